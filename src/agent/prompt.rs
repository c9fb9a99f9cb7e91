//! System prompt synthesis and the scripted greeting.
//!
//! The system turn is regenerated for every model round so the current date,
//! time and meal period stay fresh over a long conversation.

use chrono::{DateTime, Datelike, Timelike, Weekday};
use chrono_tz::Tz;

use crate::config::LocaleConfig;
use crate::corpus::TimeOfDay;

/// Assistant greeting appended before the first user message.
pub const WELCOME: &str = "\u{a1}Hola! \u{1f44b} Soy tu asistente virtual del centro comercial.\n\
Estoy aqu\u{ed} para ayudarte a encontrar el restaurante perfecto seg\u{fa}n tus preferencias. Puedo ayudarte con:\n\n\
\u{2022} Recomendaciones de restaurantes seg\u{fa}n tipo de cocina\n\
\u{2022} Opciones diet\u{e9}ticas (vegetariano, vegano, sin gluten)\n\
\u{2022} Ubicaci\u{f3}n de restaurantes en el centro comercial\n\
\u{2022} Informaci\u{f3}n sobre precios y horarios\n";

fn spanish_weekday(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "lunes",
        Weekday::Tue => "martes",
        Weekday::Wed => "mi\u{e9}rcoles",
        Weekday::Thu => "jueves",
        Weekday::Fri => "viernes",
        Weekday::Sat => "s\u{e1}bado",
        Weekday::Sun => "domingo",
    }
}

fn spanish_month(month: u32) -> &'static str {
    match month {
        1 => "enero",
        2 => "febrero",
        3 => "marzo",
        4 => "abril",
        5 => "mayo",
        6 => "junio",
        7 => "julio",
        8 => "agosto",
        9 => "septiembre",
        10 => "octubre",
        11 => "noviembre",
        _ => "diciembre",
    }
}

/// The meal-period line for the given local time, or `None` between meals.
#[inline]
pub fn meal_context(locale: &LocaleConfig, time: TimeOfDay) -> Option<&'static str> {
    if locale.breakfast.contains(time) {
        Some("- Es hora de desayuno.")
    } else if locale.lunch.contains(time) {
        Some("- Es hora de almuerzo.")
    } else if locale.dinner.contains(time) {
        Some("- Es hora de cena.")
    } else {
        None
    }
}

/// Render the system prompt for the given mall-local instant.
#[inline]
pub fn system_prompt(locale: &LocaleConfig, now: DateTime<Tz>) -> String {
    let current_time = format!("{:02}:{:02}", now.hour(), now.minute());
    let current_date = format!(
        "{}, {} de {} de {}",
        spanish_weekday(now.weekday()),
        now.day(),
        spanish_month(now.month()),
        now.year()
    );

    let time_of_day = TimeOfDay {
        hour: u8::try_from(now.hour()).unwrap_or(0),
        minute: u8::try_from(now.minute()).unwrap_or(0),
    };
    let meal_line = meal_context(locale, time_of_day).unwrap_or("");

    format!(
        "Eres el asistente virtual de restaurantes del centro comercial. Ayudas a los \
visitantes a elegir d\u{f3}nde comer seg\u{fa}n sus preferencias de cocina, dieta, precio, \
zona y horario.

Contexto actual:
- Fecha: {current_date}
- Hora local: {current_time}
{meal_line}

Herramientas disponibles:
- search_restaurants: busca restaurantes por descripci\u{f3}n y filtros (precio, zona, \
opciones diet\u{e9}ticas, servicios, horario).
- search_dishes: busca platos concretos en todos los restaurantes. \u{da}sala cuando el \
visitante pregunte por un plato (pasta, hamburguesa, postre) y no por un restaurante.
- get_walking_time: calcula el tiempo a pie entre dos restaurantes del centro comercial.

Reglas:
- Responde siempre en el idioma del visitante.
- Basa tus recomendaciones \u{fa}nicamente en los resultados de las herramientas; no \
inventes restaurantes ni platos.
- Si una b\u{fa}squeda no devuelve resultados, d\u{ed}selo al visitante y sugiere relajar \
alg\u{fa}n filtro.
- S\u{e9} breve y concreto: nombre del restaurante, zona, horario y por qu\u{e9} encaja con \
lo que pide."
    )
}
