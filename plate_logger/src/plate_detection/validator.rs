use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

use super::VehicleType;

const MIN_PLATE_LEN: usize = 7;
const MAX_PLATE_LEN: usize = 10;

const FOUR_WHEELER_PATTERNS: [&str; 3] = [
    r"^\d{2}[A-Z0-9]{1,2}\d{4,5}$",
    r"^\d{2}C\d{5}$",
    r"^\d{2}[AB]\d{5}$",
];

// Foreign, diplomatic and international series only issued for cars.
const CAR_SPECIAL_PATTERNS: [&str; 6] = [
    r"^[A-Z]{2}\d{4,5}$",
    r"^80NG\d{3}\d{2}$",
    r"^80NN\d{3}\d{2}$",
    r"^80QT\d{3}\d{2}$",
    r"^80LD\d{3}\d{2}$",
    r"^80CD\d{3}\d{2}$",
];

const MOTORCYCLE_PATTERNS: [&str; 1] = [r"^\d{2}[A-Z]{1,2}\d?-?\d{4,5}$"];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(err) => {
                tracing::error!("Skipping invalid plate pattern {}: {}", p, err);
                None
            }
        })
        .collect()
}

lazy_static! {
    static ref GRAMMARS: HashMap<VehicleType, Vec<Regex>> = {
        let mut table = HashMap::new();
        let mut car: Vec<&str> = FOUR_WHEELER_PATTERNS.to_vec();
        car.extend_from_slice(&CAR_SPECIAL_PATTERNS);
        table.insert(VehicleType::Car, compile(&car));
        table.insert(VehicleType::Bus, compile(&FOUR_WHEELER_PATTERNS));
        table.insert(VehicleType::Truck, compile(&FOUR_WHEELER_PATTERNS));
        table.insert(VehicleType::Motorcycle, compile(&MOTORCYCLE_PATTERNS));
        table
    };
}

/// Length of a plate string ignoring hyphens.
pub fn plate_len(text: &str) -> usize {
    text.chars().filter(|c| *c != '-').count()
}

/// Checks a plate string against the grammar of its vehicle type.
///
/// The text is trimmed and upper-cased first. Vehicle types without a grammar
/// (person, unknown) never validate.
pub fn validate(text: &str, vehicle_type: VehicleType) -> bool {
    let plate = text.trim().to_uppercase();
    if !(MIN_PLATE_LEN..=MAX_PLATE_LEN).contains(&plate_len(&plate)) {
        return false;
    }

    match GRAMMARS.get(&vehicle_type) {
        Some(patterns) => patterns.iter().any(|re| re.is_match(&plate)),
        None => false,
    }
}
