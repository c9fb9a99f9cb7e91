//! Built-in demo corpus with the mall's restaurants and a selection of
//! dishes. Used by `index --sample`, the chat demo, and tests.

use std::str::FromStr;

use crate::geo::Coordinate;

use super::{Corpus, DishRecord, PriceTier, RestaurantRecord, TimeOfDay, Zone};

#[allow(clippy::too_many_arguments)]
fn restaurant(
    id: i64,
    name: &str,
    description: &str,
    cuisines: &[&str],
    price: PriceTier,
    zone: Zone,
    (lat, lon): (f64, f64),
    hours: (&str, &str),
    // vegetarian, vegan, gluten_free, takeaway, bar, menu, reservations
    flags: [bool; 7],
    phone: Option<&str>,
    website: Option<&str>,
) -> RestaurantRecord {
    RestaurantRecord {
        id,
        name: name.to_string(),
        description: description.to_string(),
        cuisines: cuisines.iter().map(|c| (*c).to_string()).collect(),
        price,
        zone,
        location: Coordinate {
            latitude: lat,
            longitude: lon,
        },
        opens: TimeOfDay::from_str(hours.0).expect("static opening time"),
        closes: TimeOfDay::from_str(hours.1).expect("static closing time"),
        has_vegetarian: flags[0],
        has_vegan: flags[1],
        has_gluten_free: flags[2],
        has_takeaway: flags[3],
        has_bar: flags[4],
        has_menu: flags[5],
        allow_reservations: flags[6],
        phone: phone.map(str::to_string),
        website: website.map(str::to_string),
    }
}

fn dish(
    id: i64,
    restaurant_id: i64,
    name: &str,
    category: &str,
    // vegetarian, vegan, gluten_free, halal, lactose_free
    flags: [bool; 5],
) -> DishRecord {
    DishRecord {
        id,
        restaurant_id,
        name: name.to_string(),
        category: category.to_string(),
        vegetarian: flags[0],
        vegan: flags[1],
        gluten_free: flags[2],
        halal: flags[3],
        lactose_free: flags[4],
        restaurant_name: String::new(),
        zone: None,
        price: None,
    }
}

pub fn sample_corpus() -> Corpus {
    let restaurants = vec![
        restaurant(
            1,
            "Dino",
            "Trattoria with fresh hand-made pasta, wood-fired pizza and Italian desserts.",
            &["italian", "pizza", "pasta"],
            PriceTier::Medium,
            Zone::North,
            (41.611700, 2.344400),
            ("12:00", "23:00"),
            [true, true, true, false, true, true, true],
            Some("+34 938 000 101"),
            Some("https://example.com/dino"),
        ),
        restaurant(
            2,
            "Andreu",
            "Artisan charcuterie and hot sandwiches with local cured meats and cheeses.",
            &["deli", "sandwiches", "catalan"],
            PriceTier::Medium,
            Zone::North,
            (41.613362, 2.345123),
            ("09:00", "21:30"),
            [true, false, false, true, false, true, false],
            Some("+34 938 000 102"),
            None,
        ),
        restaurant(
            3,
            "Atmósferas Mordisco",
            "Seasonal Mediterranean market cuisine with an extensive wine list.",
            &["mediterranean", "market"],
            PriceTier::High,
            Zone::Center,
            (41.610738, 2.343823),
            ("13:00", "23:30"),
            [true, true, true, false, true, true, true],
            Some("+34 938 000 103"),
            Some("https://example.com/mordisco"),
        ),
        restaurant(
            4,
            "Izky Noodles",
            "Fast asian street food: ramen, wok noodles and gyozas to eat in or take away.",
            &["asian", "noodles", "street food"],
            PriceTier::Low,
            Zone::South,
            (41.609422, 2.342783),
            ("11:30", "22:00"),
            [true, true, false, true, false, false, false],
            None,
            None,
        ),
        restaurant(
            5,
            "Starbucks",
            "Coffee house with espresso drinks, teas, pastries and light snacks.",
            &["coffee", "bakery"],
            PriceTier::Low,
            Zone::Center,
            (41.610216, 2.343253),
            ("08:00", "21:00"),
            [true, true, false, true, false, false, false],
            None,
            Some("https://example.com/starbucks"),
        ),
        restaurant(
            6,
            "Corso Iluzione",
            "Classic Roman cuisine: carbonara, saltimbocca and an italian wine cellar.",
            &["italian", "roman"],
            PriceTier::High,
            Zone::South,
            (41.608389, 2.342116),
            ("13:00", "23:00"),
            [true, false, true, false, true, true, true],
            Some("+34 938 000 106"),
            Some("https://example.com/corso"),
        ),
        restaurant(
            7,
            "Farggi 1957",
            "Ice cream parlour with artisan gelato, waffles and milkshakes.",
            &["ice cream", "desserts"],
            PriceTier::Low,
            Zone::South,
            (41.608412, 2.342555),
            ("10:00", "22:30"),
            [true, true, true, true, false, false, false],
            None,
            None,
        ),
        restaurant(
            8,
            "Fire & Bread",
            "Stone-oven flatbreads, focaccia and grilled vegetables, all to share.",
            &["bakery", "grill"],
            PriceTier::Medium,
            Zone::Center,
            (41.610417, 2.343262),
            ("10:00", "22:00"),
            [true, true, false, true, false, true, false],
            Some("+34 938 000 108"),
            None,
        ),
    ];

    let dishes = vec![
        dish(101, 1, "Spaghetti al pomodoro", "pasta", [true, true, false, false, true]),
        dish(102, 1, "Tagliatelle al ragù", "pasta", [false, false, false, false, false]),
        dish(103, 1, "Pizza margherita", "pizza", [true, false, false, false, false]),
        dish(104, 1, "Tiramisù", "dessert", [true, false, false, false, false]),
        dish(105, 2, "Bikini de jamón y queso", "sandwich", [false, false, false, false, false]),
        dish(106, 2, "Bocadillo vegetal", "sandwich", [true, false, false, false, false]),
        dish(107, 3, "Parrillada de verduras", "main", [true, true, true, false, true]),
        dish(108, 3, "Lubina a la brasa", "main", [false, false, true, false, true]),
        dish(109, 4, "Ramen de miso", "noodles", [false, false, false, true, true]),
        dish(110, 4, "Wok de verduras", "noodles", [true, true, false, true, true]),
        dish(111, 5, "Cappuccino", "drink", [true, false, true, false, false]),
        dish(112, 6, "Carbonara", "pasta", [false, false, false, false, false]),
        dish(113, 6, "Saltimbocca alla romana", "main", [false, false, true, false, false]),
        dish(114, 7, "Gelato de pistacho", "dessert", [true, false, true, false, false]),
        dish(115, 8, "Focaccia de romero", "bakery", [true, true, false, false, true]),
    ];

    Corpus {
        restaurants,
        dishes,
    }
}
