use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mesa_guide::commands::{
    chat, index_corpus, search_dishes, search_restaurants, show_config, show_status,
    DishSearchOpts, RestaurantSearchOpts,
};
use mesa_guide::config::{get_config_dir, Config};
use mesa_guide::Result;

#[derive(Parser)]
#[command(name = "mesa-guide")]
#[command(about = "Mall restaurant guide with semantic search and a recommendation agent")]
#[command(version)]
struct Cli {
    /// Corpus JSON file (defaults to the built-in sample corpus)
    #[arg(long, global = true)]
    corpus: Option<PathBuf>,

    /// Skip the embedding server and use the offline embedder
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current configuration
    Config,
    /// Index a corpus and report counts
    Index,
    /// Search restaurants from the command line
    Search {
        /// Natural language query
        query: String,
        /// Number of results
        #[arg(short, long)]
        n_results: Option<usize>,
        /// Filter by mall zone: north, center or south
        #[arg(long)]
        zone: Option<String>,
        /// Filter by price level: low, medium or high
        #[arg(long)]
        price: Option<String>,
        /// Only restaurants with vegetarian options
        #[arg(long)]
        vegetarian: bool,
        /// Only restaurants with vegan options
        #[arg(long)]
        vegan: bool,
        /// Only restaurants with gluten-free options
        #[arg(long)]
        gluten_free: bool,
        /// Only restaurants open at this time (HH:MM)
        #[arg(long)]
        open_at: Option<String>,
    },
    /// Search dishes from the command line
    Dishes {
        /// Natural language query
        query: String,
        /// Number of results
        #[arg(short, long)]
        n_results: Option<usize>,
        /// Filter by mall zone: north, center or south
        #[arg(long)]
        zone: Option<String>,
        /// Filter by restaurant price level: low, medium or high
        #[arg(long)]
        price: Option<String>,
        /// Filter by restaurant name
        #[arg(long)]
        restaurant: Option<String>,
        /// Filter by dish category
        #[arg(long)]
        category: Option<String>,
        /// Only vegetarian dishes
        #[arg(long)]
        vegetarian: bool,
        /// Only vegan dishes
        #[arg(long)]
        vegan: bool,
        /// Only gluten-free dishes
        #[arg(long)]
        gluten_free: bool,
        /// Only halal dishes
        #[arg(long)]
        halal: bool,
        /// Only lactose-free dishes
        #[arg(long)]
        lactose_free: bool,
    },
    /// Start an interactive recommendation chat
    Chat,
    /// Show configuration and service status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(get_config_dir()?)?;
    let corpus = cli.corpus.as_deref();

    match cli.command {
        Commands::Config => {
            show_config(&config)?;
        }
        Commands::Index => {
            index_corpus(&config, corpus, cli.offline).await?;
        }
        Commands::Search {
            query,
            n_results,
            zone,
            price,
            vegetarian,
            vegan,
            gluten_free,
            open_at,
        } => {
            let opts = RestaurantSearchOpts {
                n_results,
                zone,
                price,
                vegetarian,
                vegan,
                gluten_free,
                open_at,
            };
            search_restaurants(&config, corpus, cli.offline, &query, &opts).await?;
        }
        Commands::Dishes {
            query,
            n_results,
            zone,
            price,
            restaurant,
            category,
            vegetarian,
            vegan,
            gluten_free,
            halal,
            lactose_free,
        } => {
            let opts = DishSearchOpts {
                n_results,
                zone,
                price,
                restaurant,
                category,
                vegetarian,
                vegan,
                gluten_free,
                halal,
                lactose_free,
            };
            search_dishes(&config, corpus, cli.offline, &query, &opts).await?;
        }
        Commands::Chat => {
            chat(&config, corpus, cli.offline).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["mesa-guide", "chat"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            matches!(parsed.command, Commands::Chat);
        }
    }

    #[test]
    fn search_command_with_filters() {
        let cli = Cli::try_parse_from([
            "mesa-guide",
            "search",
            "italian food",
            "--zone",
            "north",
            "--vegan",
            "-n",
            "5",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Search {
                query,
                zone,
                vegan,
                n_results,
                ..
            } = parsed.command
            {
                assert_eq!(query, "italian food");
                assert_eq!(zone, Some("north".to_string()));
                assert!(vegan);
                assert_eq!(n_results, Some(5));
            }
        }
    }

    #[test]
    fn dishes_command_with_restaurant_filter() {
        let cli = Cli::try_parse_from([
            "mesa-guide",
            "dishes",
            "carbonara",
            "--restaurant",
            "Corso Iluzione",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Dishes {
                query, restaurant, ..
            } = parsed.command
            {
                assert_eq!(query, "carbonara");
                assert_eq!(restaurant, Some("Corso Iluzione".to_string()));
            }
        }
    }

    #[test]
    fn global_corpus_flag() {
        let cli = Cli::try_parse_from(["mesa-guide", "index", "--corpus", "mall.json"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert_eq!(parsed.corpus, Some(PathBuf::from("mall.json")));
        }
    }

    #[test]
    fn search_requires_query() {
        let cli = Cli::try_parse_from(["mesa-guide", "search"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["mesa-guide", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["mesa-guide", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
