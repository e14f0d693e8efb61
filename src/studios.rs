use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::db::SharedConnection;
use crate::errors::{AppError, AppResult};

const GEO_EPSILON: f64 = 0.00001;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudioAddress {
    pub street: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

impl StudioAddress {
    /// Joins the non-blank components as `street, city, region, postal, country`.
    pub fn joined(&self) -> String {
        [
            &self.street,
            &self.city,
            &self.region,
            &self.postal_code,
            &self.country,
        ]
        .into_iter()
        .filter_map(|part| part.as_deref().map(str::trim))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Studio {
    pub id: i64,
    pub name: String,
    pub address: StudioAddress,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub updated_at: String,
}

impl Studio {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewStudio {
    pub name: String,
    pub address: StudioAddress,
    pub coordinates: Option<(f64, f64)>,
}

/// Row access for the studios table. The core only reads address fields and
/// writes the coordinate pair; everything else belongs to the directory.
#[derive(Clone)]
pub struct StudioStore {
    db: SharedConnection,
}

impl StudioStore {
    pub fn new(db: SharedConnection) -> Self {
        Self { db }
    }

    pub fn insert(&self, studio: &NewStudio) -> AppResult<i64> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO studios (name, street, city, region, postal_code, country, latitude, longitude)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                studio.name,
                studio.address.street,
                studio.address.city,
                studio.address.region,
                studio.address.postal_code,
                studio.address.country,
                studio.coordinates.map(|(lat, _)| lat),
                studio.coordinates.map(|(_, lng)| lng),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn load(&self, id: i64) -> AppResult<Option<Studio>> {
        let conn = self.db.lock();
        conn.query_row(
            "SELECT id, name, street, city, region, postal_code, country, latitude, longitude, updated_at
            FROM studios
            WHERE id = ?1",
            [id],
            parse_studio,
        )
        .optional()
        .map_err(AppError::from)
    }

    /// Writes both coordinates and bumps `updated_at` in one statement.
    pub fn write_coordinates(&self, id: i64, lat: f64, lng: f64) -> AppResult<()> {
        let conn = self.db.lock();
        let updated = conn.execute(
            "UPDATE studios
            SET latitude = ?2, longitude = ?3, updated_at = DATETIME('now')
            WHERE id = ?1",
            params![id, lat, lng],
        )?;
        if updated == 0 {
            return Err(AppError::NotFound(id));
        }
        trace!(studio_id = id, lat, lng, "studio coordinates written");
        Ok(())
    }

    /// Ids of studios that have an address but no usable coordinates: either
    /// null, or within `GEO_EPSILON` of the placeholder pair.
    pub fn find_unresolved(&self, placeholder: (f64, f64)) -> AppResult<Vec<i64>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT id FROM studios
            WHERE TRIM(COALESCE(street, '') || COALESCE(city, '') || COALESCE(region, '')
                || COALESCE(postal_code, '') || COALESCE(country, '')) <> ''
              AND (
                latitude IS NULL OR longitude IS NULL
                OR (ABS(latitude - ?1) <= ?3 AND ABS(longitude - ?2) <= ?3)
              )
            ORDER BY id ASC",
        )?;
        let ids = stmt
            .query_map(params![placeholder.0, placeholder.1, GEO_EPSILON], |row| {
                row.get(0)
            })?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }
}

fn parse_studio(row: &Row<'_>) -> rusqlite::Result<Studio> {
    Ok(Studio {
        id: row.get(0)?,
        name: row.get(1)?,
        address: StudioAddress {
            street: row.get(2)?,
            city: row.get(3)?,
            region: row.get(4)?,
            postal_code: row.get(5)?,
            country: row.get(6)?,
        },
        latitude: row.get(7)?,
        longitude: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn white_house() -> NewStudio {
        NewStudio {
            name: "Executive Ink".into(),
            address: StudioAddress {
                street: Some("1600 Pennsylvania Ave NW".into()),
                city: Some("Washington".into()),
                region: Some("DC".into()),
                postal_code: Some("20500".into()),
                country: Some("US".into()),
            },
            coordinates: None,
        }
    }

    pub fn city_only(city: &str, coordinates: Option<(f64, f64)>) -> NewStudio {
        NewStudio {
            name: format!("{city} Tattoo"),
            address: StudioAddress {
                city: Some(city.into()),
                ..StudioAddress::default()
            },
            coordinates,
        }
    }
}
