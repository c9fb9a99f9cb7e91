//! Tool definitions, argument validation and execution.
//!
//! Results are wrapped in `<valid>` tags so the model can tell verified tool
//! output from its own text. Argument problems come back as
//! `InvalidToolArguments`, which the dispatch loop feeds to the model as an
//! error result so it can correct itself.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::LocaleConfig;
use crate::corpus::{PriceTier, TimeOfDay, Zone};
use crate::geo::walking_time_minutes;
use crate::search::{DishFilters, DishHit, RestaurantFilters, RetrievalService};
use crate::{GuideError, Result};

use super::convo::ToolInvocation;

pub const SEARCH_RESTAURANTS: &str = "search_restaurants";
pub const SEARCH_DISHES: &str = "search_dishes";
pub const GET_WALKING_TIME: &str = "get_walking_time";

/// A tool exposed to the model: name, description and JSON-schema parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SearchRestaurantsArgs {
    query: String,
    #[serde(default)]
    n_results: Option<usize>,
    #[serde(default)]
    price_level: Option<String>,
    #[serde(default)]
    zone: Option<String>,
    #[serde(default)]
    has_vegetarian: Option<bool>,
    #[serde(default)]
    has_vegan: Option<bool>,
    #[serde(default)]
    has_gluten_free: Option<bool>,
    #[serde(default)]
    has_takeaway: Option<bool>,
    #[serde(default)]
    has_bar: Option<bool>,
    #[serde(default)]
    has_menu: Option<bool>,
    #[serde(default)]
    allow_reservations: Option<bool>,
    #[serde(default)]
    open_now: Option<bool>,
    #[serde(default)]
    open_at_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchDishesArgs {
    query: String,
    #[serde(default)]
    n_results: Option<usize>,
    #[serde(default)]
    restaurant_name: Option<String>,
    #[serde(default)]
    zone: Option<String>,
    #[serde(default)]
    price_level: Option<String>,
    #[serde(default)]
    has_vegetarian: Option<bool>,
    #[serde(default)]
    has_vegan: Option<bool>,
    #[serde(default)]
    has_gluten_free: Option<bool>,
    #[serde(default)]
    has_halal: Option<bool>,
    #[serde(default)]
    has_lactose_free: Option<bool>,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetWalkingTimeArgs {
    from_restaurant: String,
    to_restaurant: String,
}

/// The three tool schemas, in the order they are offered to the model.
#[inline]
pub fn tool_definitions() -> Vec<ToolDefinition> {
    let flag = |description: &str| json!({"type": "boolean", "description": description});

    vec![
        ToolDefinition {
            name: SEARCH_RESTAURANTS.to_string(),
            description: "Search for restaurants in the mall based on user preferences. \
Returns formatted restaurant information including descriptions, cuisine types, dietary \
options, menu highlights, location zone, services, hours, and contact details."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Natural language search query (e.g., \"Italian food\", \"gluten free\", \"cheap lunch\")"
                    },
                    "n_results": {
                        "type": "integer",
                        "description": "Number of results to return (default 3)"
                    },
                    "price_level": {
                        "type": "string",
                        "enum": ["low", "medium", "high"],
                        "description": "Filter by price level"
                    },
                    "zone": {
                        "type": "string",
                        "enum": ["north", "center", "south"],
                        "description": "Filter by mall zone"
                    },
                    "has_vegetarian": flag("Filter for vegetarian options"),
                    "has_vegan": flag("Filter for vegan options"),
                    "has_gluten_free": flag("Filter for gluten-free options"),
                    "has_takeaway": flag("Filter for takeaway service"),
                    "has_bar": flag("Filter for restaurants with bar service"),
                    "has_menu": flag("Filter for restaurants with an available menu"),
                    "allow_reservations": flag("Filter for restaurants that accept reservations"),
                    "open_now": flag("Filter for restaurants currently open"),
                    "open_at_time": {
                        "type": "string",
                        "description": "Filter for restaurants open at a specific time (format \"HH:MM\", e.g. \"14:30\")"
                    }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: SEARCH_DISHES.to_string(),
            description: "Search for specific dishes across all restaurants in the mall. Use \
this when users ask about specific dishes (like \"pasta\", \"burger\", \"dessert\") rather \
than general restaurant recommendations. Returns dish information with the restaurant name \
and location where each dish is available."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Natural language search query for specific dishes (e.g., \"carbonara\", \"vegan burger\", \"tiramisu\")"
                    },
                    "n_results": {
                        "type": "integer",
                        "description": "Number of dish results to return (default 5)"
                    },
                    "restaurant_name": {
                        "type": "string",
                        "description": "Filter by specific restaurant name"
                    },
                    "zone": {
                        "type": "string",
                        "enum": ["north", "center", "south"],
                        "description": "Filter by mall zone"
                    },
                    "price_level": {
                        "type": "string",
                        "enum": ["low", "medium", "high"],
                        "description": "Filter by restaurant price level"
                    },
                    "has_vegetarian": flag("Filter for vegetarian dishes only"),
                    "has_vegan": flag("Filter for vegan dishes only"),
                    "has_gluten_free": flag("Filter for gluten-free dishes only"),
                    "has_halal": flag("Filter for halal dishes only"),
                    "has_lactose_free": flag("Filter for lactose-free dishes only"),
                    "category": {
                        "type": "string",
                        "description": "Filter by dish category"
                    }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: GET_WALKING_TIME.to_string(),
            description: "Calculate walking time in minutes between two restaurants in the \
mall. Returns the estimated walking time rounded to 1 decimal place. Walking speed is \
calibrated to mall conditions (approximately 69 meters per minute)."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "from_restaurant": {
                        "type": "string",
                        "description": "Name of the starting restaurant"
                    },
                    "to_restaurant": {
                        "type": "string",
                        "description": "Name of the destination restaurant"
                    }
                },
                "required": ["from_restaurant", "to_restaurant"]
            }),
        },
    ]
}

fn invalid_args(tool: &str, message: impl Into<String>) -> GuideError {
    GuideError::InvalidToolArguments {
        tool: tool.to_string(),
        message: message.into(),
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(tool: &str, arguments: &serde_json::Value) -> Result<T> {
    serde_json::from_value(arguments.clone()).map_err(|e| invalid_args(tool, e.to_string()))
}

fn parse_price(tool: &str, value: Option<&str>) -> Result<Option<PriceTier>> {
    value
        .map(|s| PriceTier::from_str(s).map_err(|e| invalid_args(tool, e.to_string())))
        .transpose()
}

fn parse_zone(tool: &str, value: Option<&str>) -> Result<Option<Zone>> {
    value
        .map(|s| Zone::from_str(s).map_err(|e| invalid_args(tool, e.to_string())))
        .transpose()
}

fn parse_count(tool: &str, value: Option<usize>) -> Result<Option<usize>> {
    if value == Some(0) {
        return Err(invalid_args(tool, "n_results must be at least 1"));
    }
    Ok(value)
}

/// Executes validated tool calls against the retrieval service.
pub struct ToolExecutor {
    service: Arc<RetrievalService>,
    locale: LocaleConfig,
}

impl ToolExecutor {
    #[inline]
    pub fn new(service: Arc<RetrievalService>, locale: LocaleConfig) -> Self {
        Self { service, locale }
    }

    /// Run one invocation and format its result for the model.
    #[inline]
    pub async fn execute(&self, invocation: &ToolInvocation) -> Result<String> {
        debug!(tool = %invocation.name, "Executing tool call");

        match invocation.name.as_str() {
            SEARCH_RESTAURANTS => self.search_restaurants(&invocation.arguments).await,
            SEARCH_DISHES => self.search_dishes(&invocation.arguments).await,
            GET_WALKING_TIME => self.get_walking_time(&invocation.arguments).await,
            other => Err(invalid_args(other, "unknown tool")),
        }
    }

    async fn search_restaurants(&self, arguments: &serde_json::Value) -> Result<String> {
        let args: SearchRestaurantsArgs = parse_args(SEARCH_RESTAURANTS, arguments)?;

        let open_at = match (&args.open_at_time, args.open_now) {
            (Some(time), _) => Some(
                TimeOfDay::from_str(time)
                    .map_err(|e| invalid_args(SEARCH_RESTAURANTS, e.to_string()))?,
            ),
            (None, Some(true)) => Some(self.local_time()?),
            _ => None,
        };

        let filters = RestaurantFilters {
            price: parse_price(SEARCH_RESTAURANTS, args.price_level.as_deref())?,
            zone: parse_zone(SEARCH_RESTAURANTS, args.zone.as_deref())?,
            has_vegetarian: args.has_vegetarian,
            has_vegan: args.has_vegan,
            has_gluten_free: args.has_gluten_free,
            has_takeaway: args.has_takeaway,
            has_bar: args.has_bar,
            has_menu: args.has_menu,
            allow_reservations: args.allow_reservations,
            opening_time: None,
            closing_time: None,
            open_at,
        };
        let limit = parse_count(SEARCH_RESTAURANTS, args.n_results)?;

        let hits = self
            .service
            .search_restaurants(&args.query, limit, &filters)
            .await?;

        let mut formatted = String::from("<valid>\n");
        for hit in &hits {
            formatted.push_str(&format!("\n## {}\n{}\n", hit.restaurant.name, hit.document));
            if let Some(phone) = &hit.restaurant.phone {
                formatted.push_str(&format!("Phone: {}\n", phone));
            }
            if let Some(website) = &hit.restaurant.website {
                formatted.push_str(&format!("Website: {}\n", website));
            }
        }
        formatted.push_str("</valid>");
        Ok(formatted)
    }

    async fn search_dishes(&self, arguments: &serde_json::Value) -> Result<String> {
        let args: SearchDishesArgs = parse_args(SEARCH_DISHES, arguments)?;

        let filters = DishFilters {
            vegetarian: args.has_vegetarian,
            vegan: args.has_vegan,
            gluten_free: args.has_gluten_free,
            halal: args.has_halal,
            lactose_free: args.has_lactose_free,
            zone: parse_zone(SEARCH_DISHES, args.zone.as_deref())?,
            price: parse_price(SEARCH_DISHES, args.price_level.as_deref())?,
            restaurant_name: args.restaurant_name,
            category: args.category,
        };
        let limit = parse_count(SEARCH_DISHES, args.n_results)?;

        let hits = self.service.search_dishes(&args.query, limit, &filters).await?;
        Ok(format_dish_results(&hits))
    }

    async fn get_walking_time(&self, arguments: &serde_json::Value) -> Result<String> {
        let args: GetWalkingTimeArgs = parse_args(GET_WALKING_TIME, arguments)?;

        let from = self.service.find_restaurant_by_name(&args.from_restaurant).await?;
        let to = self.service.find_restaurant_by_name(&args.to_restaurant).await?;

        let minutes = walking_time_minutes(from.location, to.location)?;
        Ok(format!(
            "<valid>\nWalking time from {} to {}: {:.1} minutes\n</valid>",
            from.name, to.name, minutes
        ))
    }

    fn local_time(&self) -> Result<TimeOfDay> {
        let tz = self
            .locale
            .tz()
            .map_err(|e| GuideError::Config(e.to_string()))?;
        let now = Utc::now().with_timezone(&tz);
        use chrono::Timelike;
        TimeOfDay::new(
            u8::try_from(now.hour()).unwrap_or(0),
            u8::try_from(now.minute()).unwrap_or(0),
        )
    }
}

/// Group dish hits by restaurant, in first-seen order, and render them.
fn format_dish_results(hits: &[DishHit]) -> String {
    let mut groups: Vec<(&str, Option<Zone>, Vec<&DishHit>)> = Vec::new();
    for hit in hits {
        let name = hit.restaurant.name.as_str();
        match groups.iter_mut().find(|(n, ..)| *n == name) {
            Some((_, _, group)) => group.push(hit),
            None => groups.push((name, Some(hit.restaurant.zone), vec![hit])),
        }
    }

    let mut formatted = String::from("<valid>\n");
    for (name, zone, group) in groups {
        formatted.push_str(&format!("\n## At {}", name));
        if let Some(zone) = zone {
            formatted.push_str(&format!(" ({} zone)", zone));
        }
        formatted.push('\n');
        for hit in group {
            formatted.push_str(&format!("- {}\n", hit.document));
        }
    }
    formatted.push_str("</valid>");
    formatted
}
