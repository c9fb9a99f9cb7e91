//! Filtered semantic retrieval over the restaurant and dish collections.
//!
//! The service owns the vector index, the embedder and the typed records.
//! Callers must index a corpus before searching; every read operation fails
//! with `IndexNotReady` until then.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::try_join;
use itertools::Itertools;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::SearchConfig;
use crate::corpus::{
    dish_document, restaurant_document, Corpus, DishRecord, PriceTier, RestaurantRecord,
    TimeOfDay, Zone,
};
use crate::index::{
    Embedder, FieldValue, IndexedDocument, SearchPredicate, VectorIndex,
};
use crate::{GuideError, Result};

pub const RESTAURANTS_COLLECTION: &str = "restaurants";
pub const DISHES_COLLECTION: &str = "dishes";

/// Menu highlights included in each restaurant's searchable document.
const MENU_HIGHLIGHTS: usize = 5;

/// Metadata filters for restaurant search. Unset fields add no constraint,
/// and a flag set to `false` adds no constraint either: filters only ever
/// narrow toward restaurants that offer something.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestaurantFilters {
    pub price: Option<PriceTier>,
    pub zone: Option<Zone>,
    pub has_vegetarian: Option<bool>,
    pub has_vegan: Option<bool>,
    pub has_gluten_free: Option<bool>,
    pub has_takeaway: Option<bool>,
    pub has_bar: Option<bool>,
    pub has_menu: Option<bool>,
    pub allow_reservations: Option<bool>,
    pub opening_time: Option<TimeOfDay>,
    pub closing_time: Option<TimeOfDay>,
    /// Only restaurants whose opening hours cover this time.
    pub open_at: Option<TimeOfDay>,
}

impl RestaurantFilters {
    fn to_predicate(&self) -> SearchPredicate {
        let mut predicate = SearchPredicate::new();
        if let Some(price) = self.price {
            predicate.text_equals("price", price.as_str());
        }
        if let Some(zone) = self.zone {
            predicate.text_equals("zone", zone.as_str());
        }
        for (field, value) in [
            ("has_vegetarian", self.has_vegetarian),
            ("has_vegan", self.has_vegan),
            ("has_gluten_free", self.has_gluten_free),
            ("has_takeaway", self.has_takeaway),
            ("has_bar", self.has_bar),
            ("has_menu", self.has_menu),
            ("allow_reservations", self.allow_reservations),
        ] {
            if value == Some(true) {
                predicate.flag_set(field);
            }
        }
        if let Some(opens) = self.opening_time {
            predicate.text_equals("opens_display", opens.to_string());
        }
        if let Some(closes) = self.closing_time {
            predicate.text_equals("closes_display", closes.to_string());
        }
        if let Some(at) = self.open_at {
            predicate.open_during(at);
        }
        predicate
    }
}

/// Metadata filters for dish search, same positive-only flag semantics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DishFilters {
    pub vegetarian: Option<bool>,
    pub vegan: Option<bool>,
    pub gluten_free: Option<bool>,
    pub halal: Option<bool>,
    pub lactose_free: Option<bool>,
    pub zone: Option<Zone>,
    pub price: Option<PriceTier>,
    pub restaurant_name: Option<String>,
    pub category: Option<String>,
}

impl DishFilters {
    fn to_predicate(&self) -> SearchPredicate {
        let mut predicate = SearchPredicate::new();
        for (field, value) in [
            ("vegetarian", self.vegetarian),
            ("vegan", self.vegan),
            ("gluten_free", self.gluten_free),
            ("halal", self.halal),
            ("lactose_free", self.lactose_free),
        ] {
            if value == Some(true) {
                predicate.flag_set(field);
            }
        }
        if let Some(zone) = self.zone {
            predicate.text_equals("zone", zone.as_str());
        }
        if let Some(price) = self.price {
            predicate.text_equals("price", price.as_str());
        }
        if let Some(name) = &self.restaurant_name {
            predicate.text_equals("restaurant_name", name.clone());
        }
        if let Some(category) = &self.category {
            predicate.text_equals("category", category.clone());
        }
        predicate
    }
}

/// A restaurant search hit: the record, its indexed document text and the
/// similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct RestaurantHit {
    pub restaurant: RestaurantRecord,
    pub document: String,
    pub score: f32,
}

/// A dish search hit, enriched with the owning restaurant's live record.
#[derive(Debug, Clone, PartialEq)]
pub struct DishHit {
    pub dish: DishRecord,
    pub restaurant: RestaurantRecord,
    pub document: String,
    pub score: f32,
}

/// Counts reported after indexing a corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub restaurants: usize,
    pub dishes: usize,
}

struct CorpusState {
    restaurants: HashMap<i64, RestaurantRecord>,
    dishes: HashMap<i64, DishRecord>,
}

pub struct RetrievalService {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    search: SearchConfig,
    state: RwLock<Option<CorpusState>>,
}

impl RetrievalService {
    #[inline]
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        search: SearchConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            search,
            state: RwLock::new(None),
        }
    }

    /// Validate the corpus, render and embed every document, and replace the
    /// contents of both collections. Safe to call again with a fresh corpus;
    /// concurrent searches wait for the swap to finish.
    #[inline]
    pub async fn load_and_index(&self, corpus: Corpus) -> Result<IndexStats> {
        corpus.validate()?;

        let restaurant_docs: Vec<String> = corpus
            .restaurants
            .iter()
            .map(|r| restaurant_document(r, &corpus.dishes_of(r.id), MENU_HIGHLIGHTS))
            .collect();
        let dish_docs: Vec<String> = corpus.dishes.iter().map(dish_document).collect();

        let embedder = Arc::clone(&self.embedder);
        let (restaurant_vectors, dish_vectors) = tokio::task::spawn_blocking(move || {
            let restaurants = embedder.embed_batch(&restaurant_docs)?;
            let dishes = embedder.embed_batch(&dish_docs)?;
            Ok::<_, GuideError>((restaurants, dishes))
        })
        .await
        .map_err(|e| GuideError::Index(format!("embedding task failed: {}", e)))??;

        let restaurant_documents: Vec<IndexedDocument> = corpus
            .restaurants
            .iter()
            .zip(restaurant_vectors)
            .map(|(restaurant, embedding)| IndexedDocument {
                id: restaurant.id,
                document: restaurant_document(
                    restaurant,
                    &corpus.dishes_of(restaurant.id),
                    MENU_HIGHLIGHTS,
                ),
                embedding,
                fields: restaurant_fields(restaurant),
            })
            .collect();

        let dish_documents: Vec<IndexedDocument> = corpus
            .dishes
            .iter()
            .zip(dish_vectors)
            .map(|(dish, embedding)| IndexedDocument {
                id: dish.id,
                document: dish_document(dish),
                embedding,
                fields: dish_fields(dish),
            })
            .collect();

        // searches hold the state read lock while querying, so taking the
        // write lock here keeps the cleared-but-not-rebuilt window invisible
        let mut state = self.state.write().await;

        for collection in [RESTAURANTS_COLLECTION, DISHES_COLLECTION] {
            self.index.ensure_collection(collection).await?;
            self.index.clear_collection(collection).await?;
        }
        try_join!(
            self.index.upsert(RESTAURANTS_COLLECTION, restaurant_documents),
            self.index.upsert(DISHES_COLLECTION, dish_documents),
        )?;

        let stats = IndexStats {
            restaurants: corpus.restaurants.len(),
            dishes: corpus.dishes.len(),
        };

        *state = Some(CorpusState {
            restaurants: corpus
                .restaurants
                .into_iter()
                .map(|r| (r.id, r))
                .collect(),
            dishes: corpus.dishes.into_iter().map(|d| (d.id, d)).collect(),
        });

        info!(
            restaurants = stats.restaurants,
            dishes = stats.dishes,
            "Indexed corpus"
        );
        Ok(stats)
    }

    /// Whether a corpus has been indexed yet.
    #[inline]
    pub async fn is_ready(&self) -> bool {
        self.state.read().await.is_some()
    }

    fn effective_limit(&self, requested: Option<usize>, default: usize) -> Result<usize> {
        let limit = requested.unwrap_or(default);
        if limit == 0 {
            return Err(GuideError::InvalidInput(
                "result count must be at least 1".to_string(),
            ));
        }
        Ok(limit.min(self.search.max_results))
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if query.trim().is_empty() {
            return Err(GuideError::InvalidInput(
                "search query must not be empty".to_string(),
            ));
        }
        let embedder = Arc::clone(&self.embedder);
        let query = query.to_string();
        tokio::task::spawn_blocking(move || embedder.embed(&query))
            .await
            .map_err(|e| GuideError::Index(format!("embedding task failed: {}", e)))?
    }

    /// Semantic restaurant search with metadata filters. `limit` defaults to
    /// the configured count and is capped at `max_results`.
    #[inline]
    pub async fn search_restaurants(
        &self,
        query: &str,
        limit: Option<usize>,
        filters: &RestaurantFilters,
    ) -> Result<Vec<RestaurantHit>> {
        let limit = self.effective_limit(limit, self.search.restaurant_results)?;
        let predicate = filters.to_predicate();

        // fail before paying for a query embedding
        if !self.is_ready().await {
            return Err(GuideError::IndexNotReady);
        }
        let embedding = self.embed_query(query).await?;

        let state = self.state.read().await;
        let state = state.as_ref().ok_or(GuideError::IndexNotReady)?;

        let hits = self
            .index
            .query(RESTAURANTS_COLLECTION, &embedding, limit, &predicate)
            .await?;

        debug!(query, hits = hits.len(), "Restaurant search");

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                state.restaurants.get(&hit.id).map(|restaurant| RestaurantHit {
                    restaurant: restaurant.clone(),
                    document: hit.document,
                    score: hit.score,
                })
            })
            .collect())
    }

    /// Semantic dish search. Each hit is enriched with the owning
    /// restaurant's current record; dishes whose restaurant is no longer in
    /// the corpus are dropped.
    #[inline]
    pub async fn search_dishes(
        &self,
        query: &str,
        limit: Option<usize>,
        filters: &DishFilters,
    ) -> Result<Vec<DishHit>> {
        let limit = self.effective_limit(limit, self.search.dish_results)?;
        let predicate = filters.to_predicate();

        if !self.is_ready().await {
            return Err(GuideError::IndexNotReady);
        }
        let embedding = self.embed_query(query).await?;

        let state = self.state.read().await;
        let state = state.as_ref().ok_or(GuideError::IndexNotReady)?;

        let hits = self
            .index
            .query(DISHES_COLLECTION, &embedding, limit, &predicate)
            .await?;

        debug!(query, hits = hits.len(), "Dish search");

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                let dish = state.dishes.get(&hit.id)?;
                let restaurant = state.restaurants.get(&dish.restaurant_id)?;
                Some(DishHit {
                    dish: dish.clone(),
                    restaurant: restaurant.clone(),
                    document: hit.document,
                    score: hit.score,
                })
            })
            .collect())
    }

    /// Fetch a restaurant by id.
    #[inline]
    pub async fn get_restaurant(&self, id: i64) -> Result<RestaurantRecord> {
        let state = self.state.read().await;
        let state = state.as_ref().ok_or(GuideError::IndexNotReady)?;
        state
            .restaurants
            .get(&id)
            .cloned()
            .ok_or(GuideError::NotFound { id })
    }

    /// Resolve a restaurant by name: first an exact case-insensitive match,
    /// then a substring match if it is unambiguous.
    #[inline]
    pub async fn find_restaurant_by_name(&self, name: &str) -> Result<RestaurantRecord> {
        let state = self.state.read().await;
        let state = state.as_ref().ok_or(GuideError::IndexNotReady)?;

        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return Err(GuideError::InvalidInput(
                "restaurant name must not be empty".to_string(),
            ));
        }

        if let Some(exact) = state
            .restaurants
            .values()
            .find(|r| r.name.to_lowercase() == needle)
        {
            return Ok(exact.clone());
        }

        // a substring match only counts when it is unambiguous
        match state
            .restaurants
            .values()
            .filter(|r| r.name.to_lowercase().contains(&needle))
            .at_most_one()
        {
            Ok(Some(only)) => Ok(only.clone()),
            _ => Err(GuideError::RestaurantNotFound {
                name: name.to_string(),
            }),
        }
    }
}

fn restaurant_fields(restaurant: &RestaurantRecord) -> BTreeMap<String, FieldValue> {
    let mut fields = BTreeMap::new();
    fields.insert(
        "price".to_string(),
        FieldValue::Text(restaurant.price.as_str().to_string()),
    );
    fields.insert(
        "zone".to_string(),
        FieldValue::Text(restaurant.zone.as_str().to_string()),
    );
    for (name, value) in [
        ("has_vegetarian", restaurant.has_vegetarian),
        ("has_vegan", restaurant.has_vegan),
        ("has_gluten_free", restaurant.has_gluten_free),
        ("has_takeaway", restaurant.has_takeaway),
        ("has_bar", restaurant.has_bar),
        ("has_menu", restaurant.has_menu),
        ("allow_reservations", restaurant.allow_reservations),
    ] {
        fields.insert(name.to_string(), FieldValue::Flag(value));
    }
    fields.insert(
        "opens".to_string(),
        FieldValue::Number(f64::from(restaurant.opens.minutes_from_midnight())),
    );
    fields.insert(
        "closes".to_string(),
        FieldValue::Number(f64::from(restaurant.closes.minutes_from_midnight())),
    );
    fields.insert(
        "opens_display".to_string(),
        FieldValue::Text(restaurant.opens.to_string()),
    );
    fields.insert(
        "closes_display".to_string(),
        FieldValue::Text(restaurant.closes.to_string()),
    );
    fields
}

fn dish_fields(dish: &DishRecord) -> BTreeMap<String, FieldValue> {
    let mut fields = BTreeMap::new();
    for (name, value) in [
        ("vegetarian", dish.vegetarian),
        ("vegan", dish.vegan),
        ("gluten_free", dish.gluten_free),
        ("halal", dish.halal),
        ("lactose_free", dish.lactose_free),
    ] {
        fields.insert(name.to_string(), FieldValue::Flag(value));
    }
    if let Some(zone) = dish.zone {
        fields.insert(
            "zone".to_string(),
            FieldValue::Text(zone.as_str().to_string()),
        );
    }
    if let Some(price) = dish.price {
        fields.insert(
            "price".to_string(),
            FieldValue::Text(price.as_str().to_string()),
        );
    }
    if !dish.restaurant_name.is_empty() {
        fields.insert(
            "restaurant_name".to_string(),
            FieldValue::Text(dish.restaurant_name.clone()),
        );
    }
    fields.insert(
        "category".to_string(),
        FieldValue::Text(dish.category.clone()),
    );
    fields.insert(
        "restaurant_id".to_string(),
        FieldValue::Number(dish.restaurant_id as f64),
    );
    fields
}
