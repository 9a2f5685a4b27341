//! Built-in environmental catalog.
//!
//! Mirrors the platform schema: relational tables behind the `postgres`
//! workspace, document collections behind `mongodb`, and the CSV sensor
//! feed exposed through the `drill` file workspace. Every entity that
//! takes part in cross-store merges shares `region_id`.

use super::types::{EntitySchema, FieldSchema, SchemaCatalog};
use crate::error::CatalogError;
use crate::query::Role;

use super::types::SemanticType::{Integer, List, Number, Text, Timestamp};

pub const POSTGRES: &str = "postgres";
pub const MONGODB: &str = "mongodb";
pub const DRILL: &str = "drill";

/// Store identifiers used by the built-in catalog.
pub const BUILTIN_STORES: [&str; 3] = [POSTGRES, MONGODB, DRILL];

/// Build the built-in catalog.
pub fn builtin_catalog() -> Result<SchemaCatalog, CatalogError> {
    SchemaCatalog::with_stores(builtin_entities(), &BUILTIN_STORES)
}

/// Entities in declaration order. Order matters for tie-breaking during
/// entity resolution.
pub fn builtin_entities() -> Vec<EntitySchema> {
    vec![
        climate(),
        agriculture(),
        region(),
        biodiversity(),
        air_quality(),
        sensor_log(),
        species(),
        sensor(),
        sensor_reading(),
    ]
}

fn region_name() -> FieldSchema {
    FieldSchema::new("region_name", Text).alias("region")
}

// ============================================================================
// Relational (postgres)
// ============================================================================

fn climate() -> EntitySchema {
    EntitySchema::new("Climate", POSTGRES, "climate_with_region")
        .alias("climate data")
        .alias("weather")
        .field(FieldSchema::new("climate_id", Integer))
        .field(FieldSchema::new("region_id", Integer))
        .field(region_name())
        .field(
            FieldSchema::measure("temperature", Number)
                .alias("temp")
                .alias("temperatures")
                .thresholds(10.0, 25.0),
        )
        .field(
            FieldSchema::measure("rainfall", Number)
                .alias("rain")
                .alias("precipitation")
                .thresholds(50.0, 200.0),
        )
        .field(FieldSchema::measure("humidity", Number).thresholds(40.0, 70.0))
        .field(FieldSchema::new("timestamp", Timestamp))
        .location("region_name")
        .join_on("region_id")
}

fn agriculture() -> EntitySchema {
    EntitySchema::new("Agriculture", POSTGRES, "agriculture_with_region")
        .alias("agricultural")
        .alias("farming")
        .alias("harvest")
        .field(FieldSchema::new("agri_id", Integer))
        .field(FieldSchema::new("region_id", Integer))
        .field(region_name())
        .field(FieldSchema::new("crop_type", Text).alias("crop").alias("crops"))
        .field(FieldSchema::measure("yield", Number).alias("yields"))
        .field(FieldSchema::new("season", Text))
        .field(FieldSchema::new("year", Integer))
        .location("region_name")
        .join_on("region_id")
}

fn region() -> EntitySchema {
    EntitySchema::new("Region", POSTGRES, "region_info")
        .alias("regions")
        .alias("region info")
        .field(FieldSchema::new("region_id", Integer))
        .field(FieldSchema::new("region_name", Text))
        .field(FieldSchema::measure("latitude", Number).alias("lat"))
        .field(FieldSchema::measure("longitude", Number).alias("lon"))
        .location("region_name")
        .join_on("region_id")
}

// ============================================================================
// Document (mongodb)
// ============================================================================

fn biodiversity() -> EntitySchema {
    EntitySchema::new("Biodiversity", MONGODB, "Biodiversity_Data")
        .alias("biodiversity data")
        .alias("ecosystems")
        .field(FieldSchema::new("biodiversity_id", Text).filterable(false))
        .field(FieldSchema::new("region_id", Integer))
        .field(region_name())
        .field(FieldSchema::measure("species_count", Integer))
        .field(FieldSchema::new("endangered_species", List).alias("endangered"))
        .field(FieldSchema::new("dominant_flora", List).alias("flora"))
        .field(FieldSchema::new("conservation_status", Text).alias("conservation"))
        .field(FieldSchema::new("last_survey_date", Timestamp).alias("survey date"))
        .location("region_name")
        .join_on("region_id")
}

fn air_quality() -> EntitySchema {
    EntitySchema::new("AirQuality", MONGODB, "Air_Quality_History")
        .alias("air")
        .alias("pollution")
        .field(FieldSchema::new("air_quality_id", Text).filterable(false))
        .field(FieldSchema::new("region_id", Integer))
        .field(region_name())
        .field(
            FieldSchema::measure("aqi", Number)
                .alias("air quality index")
                .thresholds(50.0, 150.0),
        )
        .field(FieldSchema::new("air_quality_level", Text).alias("level"))
        .field(FieldSchema::new("recorded_date", Timestamp))
        .location("region_name")
        .join_on("region_id")
}

fn sensor_log() -> EntitySchema {
    EntitySchema::new("SensorLog", MONGODB, "Sensor_Logs")
        .alias("sensor logs")
        .alias("logs")
        .alias("events")
        .field(FieldSchema::new("log_id", Text).filterable(false))
        .field(FieldSchema::new("sensor_id", Text))
        .field(FieldSchema::new("region_id", Integer))
        .field(FieldSchema::new("event_type", Text).alias("event"))
        .field(FieldSchema::new("severity", Text))
        .field(FieldSchema::new("message", Text))
        .field(FieldSchema::new("timestamp", Timestamp))
        .join_on("region_id")
}

fn species() -> EntitySchema {
    EntitySchema::new("Species", MONGODB, "Species_Details")
        .alias("animals")
        .alias("plants")
        .field(FieldSchema::new("species_id", Text).filterable(false))
        .field(FieldSchema::new("species_name", Text).alias("name"))
        .field(FieldSchema::new("scientific_name", Text))
        .field(FieldSchema::new("habitat", Text))
        .field(FieldSchema::new("conservation_status", Text).alias("conservation"))
        .field(FieldSchema::measure("population_estimate", Integer).alias("population"))
        .location("habitat")
}

fn sensor() -> EntitySchema {
    EntitySchema::new("Sensor", MONGODB, "Sensor_Metadata")
        .alias("sensors")
        .alias("devices")
        .field(FieldSchema::new("sensor_id", Text))
        .field(FieldSchema::new("sensor_type", Text))
        .field(FieldSchema::new("location_name", Text).alias("location"))
        .field(FieldSchema::new("region_id", Integer))
        .field(FieldSchema::new("installation_date", Timestamp))
        .field(FieldSchema::new("status", Text))
        .field(FieldSchema::new("last_maintenance", Timestamp).alias("maintenance"))
        .location("location_name")
        .join_on("region_id")
}

// ============================================================================
// Flat files (drill dfs)
// ============================================================================

fn sensor_reading() -> EntitySchema {
    EntitySchema::new("SensorReading", DRILL, "sensor_readings.csv")
        .alias("sensor readings")
        .alias("readings")
        .field(FieldSchema::new("timestamp", Timestamp).stored_as_text())
        .field(FieldSchema::new("region_id", Integer).stored_as_text())
        .field(
            FieldSchema::measure("co2_level", Number)
                .alias("co2")
                .stored_as_text()
                .thresholds(350.0, 450.0),
        )
        .field(
            FieldSchema::measure("pm2_5", Number)
                .alias("pm2.5")
                .alias("particulate matter")
                .stored_as_text(),
        )
        .join_on("region_id")
        .restricted_to(vec![Role::Researcher, Role::Administrator])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let catalog = builtin_catalog().unwrap();
        assert_eq!(catalog.len(), 9);
        assert_eq!(
            catalog.stores().into_iter().collect::<Vec<_>>(),
            vec!["drill", "mongodb", "postgres"]
        );
    }

    #[test]
    fn test_every_entity_maps_to_one_store() {
        let catalog = builtin_catalog().unwrap();
        for entity in catalog.entities() {
            assert!(BUILTIN_STORES.contains(&entity.store.as_str()), "{}", entity.name);
        }
    }

    #[test]
    fn test_join_keys_share_a_type() {
        let catalog = builtin_catalog().unwrap();
        for entity in catalog.entities() {
            if let Some(key) = &entity.join_key {
                assert_eq!(key, "region_id");
                assert_eq!(entity.get_field(key).unwrap().ty, Integer);
            }
        }
    }

    #[test]
    fn test_sensor_readings_are_text_backed() {
        let catalog = builtin_catalog().unwrap();
        let readings = catalog.entity("SensorReading").unwrap();
        assert!(readings.fields.iter().all(|f| f.stored_as_text));
        assert!(!readings.allows(Role::DataProvider));
        assert!(readings.allows(Role::Researcher));
    }
}
