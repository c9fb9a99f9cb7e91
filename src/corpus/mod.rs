//! Restaurant and dish records plus the searchable-document builder.
//!
//! The corpus is an immutable, in-process projection of the authoritative
//! store. Records come in from a JSON export of the source spreadsheet; this
//! module validates referential integrity and renders the text documents
//! that get embedded and indexed.


mod sample;

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;
use crate::{GuideError, Result};

/// Time of day, parsed from and rendered as `"HH:MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    #[inline]
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(GuideError::InvalidInput(format!(
                "time of day out of range: {:02}:{:02}",
                hour, minute
            )));
        }
        Ok(Self { hour, minute })
    }

    #[inline]
    pub fn minutes_from_midnight(&self) -> u16 {
        u16::from(self.hour) * 60 + u16::from(self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = GuideError;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || GuideError::InvalidInput(format!("invalid time of day: {:?}", s));
        let (hour, minute) = s.split_once(':').ok_or_else(invalid)?;
        let hour: u8 = hour.trim().parse().map_err(|_| invalid())?;
        let minute: u8 = minute.trim().parse().map_err(|_| invalid())?;
        Self::new(hour, minute).map_err(|_| invalid())
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl Serialize for TimeOfDay {
    #[inline]
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    #[inline]
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Price tier of a restaurant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceTier {
    Low,
    Medium,
    High,
}

impl PriceTier {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for PriceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriceTier {
    type Err = GuideError;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(GuideError::InvalidInput(format!(
                "unknown price level: {:?} (expected low, medium or high)",
                other
            ))),
        }
    }
}

/// Mall zone a restaurant sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    North,
    Center,
    South,
}

impl Zone {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::North => "north",
            Self::Center => "center",
            Self::South => "south",
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Zone {
    type Err = GuideError;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "north" => Ok(Self::North),
            "center" => Ok(Self::Center),
            "south" => Ok(Self::South),
            other => Err(GuideError::InvalidInput(format!(
                "unknown zone: {:?} (expected north, center or south)",
                other
            ))),
        }
    }
}

/// A restaurant as loaded from the source corpus. Immutable after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestaurantRecord {
    pub id: i64,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub cuisines: Vec<String>,
    pub price: PriceTier,
    pub zone: Zone,
    pub location: Coordinate,
    pub opens: TimeOfDay,
    pub closes: TimeOfDay,
    #[serde(default)]
    pub has_vegetarian: bool,
    #[serde(default)]
    pub has_vegan: bool,
    #[serde(default)]
    pub has_gluten_free: bool,
    #[serde(default)]
    pub has_takeaway: bool,
    #[serde(default)]
    pub has_bar: bool,
    #[serde(default)]
    pub has_menu: bool,
    #[serde(default)]
    pub allow_reservations: bool,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
}

impl RestaurantRecord {
    /// Dietary options offered, in display order.
    #[inline]
    pub fn dietary_tags(&self) -> Vec<&'static str> {
        let mut tags = Vec::new();
        if self.has_vegetarian {
            tags.push("vegetarian");
        }
        if self.has_vegan {
            tags.push("vegan");
        }
        if self.has_gluten_free {
            tags.push("gluten free");
        }
        tags
    }

    /// Services offered, in display order.
    #[inline]
    pub fn services(&self) -> Vec<&'static str> {
        let mut services = Vec::new();
        if self.has_takeaway {
            services.push("takeaway");
        }
        if self.has_bar {
            services.push("bar");
        }
        if self.allow_reservations {
            services.push("reservations");
        }
        services
    }

    /// Whether the restaurant is open at the given time of day.
    #[inline]
    pub fn is_open_at(&self, time: TimeOfDay) -> bool {
        self.opens <= time && time <= self.closes
    }
}

/// A dish offered by a restaurant. Restaurant name, zone and price are
/// denormalized at load time so dish search can filter without a join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishRecord {
    pub id: i64,
    pub restaurant_id: i64,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub vegetarian: bool,
    #[serde(default)]
    pub vegan: bool,
    #[serde(default)]
    pub gluten_free: bool,
    #[serde(default)]
    pub halal: bool,
    #[serde(default)]
    pub lactose_free: bool,
    #[serde(default)]
    pub restaurant_name: String,
    #[serde(default)]
    pub zone: Option<Zone>,
    #[serde(default)]
    pub price: Option<PriceTier>,
}

impl DishRecord {
    #[inline]
    pub fn dietary_tags(&self) -> Vec<&'static str> {
        let mut tags = Vec::new();
        if self.vegetarian {
            tags.push("vegetarian");
        }
        if self.vegan {
            tags.push("vegan");
        }
        if self.gluten_free {
            tags.push("gluten free");
        }
        if self.halal {
            tags.push("halal");
        }
        if self.lactose_free {
            tags.push("lactose free");
        }
        tags
    }
}

/// The full load unit: every restaurant and dish in the mall.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Corpus {
    pub restaurants: Vec<RestaurantRecord>,
    pub dishes: Vec<DishRecord>,
}

impl Corpus {
    /// Load a corpus from a JSON file and validate it.
    #[inline]
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GuideError::Corpus(format!(
                "failed to read corpus file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let mut corpus: Corpus = serde_json::from_str(&content)
            .map_err(|e| GuideError::Corpus(format!("failed to parse corpus JSON: {}", e)))?;
        corpus.link_dishes();
        corpus.validate()?;
        Ok(corpus)
    }

    /// Built-in demo corpus with the mall's restaurants.
    #[inline]
    pub fn sample() -> Self {
        let mut corpus = sample::sample_corpus();
        corpus.link_dishes();
        corpus
    }

    /// Fill in the denormalized restaurant fields on every dish from the
    /// owning restaurant record.
    fn link_dishes(&mut self) {
        for dish in &mut self.dishes {
            if let Some(restaurant) = self
                .restaurants
                .iter()
                .find(|r| r.id == dish.restaurant_id)
            {
                dish.restaurant_name = restaurant.name.clone();
                dish.zone = Some(restaurant.zone);
                dish.price = Some(restaurant.price);
            }
        }
    }

    /// Check identifier uniqueness and that every dish's owning restaurant
    /// exists. Indexing a corpus that fails validation is refused.
    #[inline]
    pub fn validate(&self) -> Result<()> {
        let mut restaurant_ids = HashSet::new();
        for restaurant in &self.restaurants {
            if !restaurant_ids.insert(restaurant.id) {
                return Err(GuideError::Corpus(format!(
                    "duplicate restaurant id: {}",
                    restaurant.id
                )));
            }
            restaurant.location.validate()?;
        }

        let mut dish_ids = HashSet::new();
        for dish in &self.dishes {
            if !dish_ids.insert(dish.id) {
                return Err(GuideError::Corpus(format!("duplicate dish id: {}", dish.id)));
            }
            if !restaurant_ids.contains(&dish.restaurant_id) {
                return Err(GuideError::Corpus(format!(
                    "dish {} ({}) references unknown restaurant id {}",
                    dish.id, dish.name, dish.restaurant_id
                )));
            }
        }

        Ok(())
    }

    /// Dishes belonging to the given restaurant, in corpus order.
    #[inline]
    pub fn dishes_of(&self, restaurant_id: i64) -> Vec<&DishRecord> {
        self.dishes
            .iter()
            .filter(|d| d.restaurant_id == restaurant_id)
            .collect()
    }
}

/// Render the searchable description for a restaurant, including up to
/// `top_n` menu highlights.
#[inline]
pub fn restaurant_document(
    restaurant: &RestaurantRecord,
    dishes: &[&DishRecord],
    top_n: usize,
) -> String {
    let mut parts: Vec<String> = vec![format!(
        "{} is a {}-priced restaurant located in the {} zone of the mall.",
        restaurant.name, restaurant.price, restaurant.zone
    )];
    parts.push(restaurant.description.clone());

    if !restaurant.cuisines.is_empty() {
        parts.push(format!("Cuisine types: {}.", restaurant.cuisines.join(", ")));
    }

    let dietary = restaurant.dietary_tags();
    if !dietary.is_empty() {
        parts.push(format!("Dietary options available: {}.", dietary.join(", ")));
    }

    let services = restaurant.services();
    if !services.is_empty() {
        parts.push(format!("Services: {}.", services.join(", ")));
    }

    parts.push(format!("Open {}-{}.", restaurant.opens, restaurant.closes));

    if !dishes.is_empty() {
        parts.push("\nMenu highlights:".to_string());
        for dish in dishes.iter().take(top_n) {
            let tags = dish.dietary_tags();
            if tags.is_empty() {
                parts.push(format!("- {}", dish.name));
            } else {
                parts.push(format!("- {} ({})", dish.name, tags.join(", ")));
            }
        }
    }

    parts.join(" ")
}

/// Render the searchable line for a single dish.
#[inline]
pub fn dish_document(dish: &DishRecord) -> String {
    let mut doc = format!("{} ({})", dish.name, dish.category);
    let tags = dish.dietary_tags();
    if !tags.is_empty() {
        doc.push_str(&format!(", {}", tags.join(", ")));
    }
    if !dish.restaurant_name.is_empty() {
        doc.push_str(&format!(", served at {}", dish.restaurant_name));
    }
    doc
}
