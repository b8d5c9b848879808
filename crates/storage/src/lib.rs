use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use concierge_core::{Budget, ChatRole, Dietary, Mobility, Preferences};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

pub const DEFAULT_HISTORY_LIMIT: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub booking_id: i64,
    pub traveler_id: i64,
    pub property_id: Option<i64>,
    pub property_name: Option<String>,
    pub location: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub guests: Option<u32>,
    pub party_type: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteRecord {
    pub favorite_id: i64,
    pub traveler_id: i64,
    pub property_id: i64,
    pub name: String,
    pub location: Option<String>,
    pub price_per_night: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatHistoryEntry {
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

pub trait BookingRepository: Send + Sync {
    async fn get_booking(&self, booking_id: i64) -> Result<Option<BookingRecord>>;
    /// Most recent stays first.
    async fn bookings_for_traveler(&self, traveler_id: i64, limit: usize) -> Result<Vec<BookingRecord>>;
    async fn upsert_booking(&self, booking: BookingRecord) -> Result<()>;
}

pub trait PreferencesRepository: Send + Sync {
    async fn traveler_preferences(&self, traveler_id: i64) -> Result<Option<Preferences>>;
    async fn upsert_preferences(&self, traveler_id: i64, prefs: &Preferences) -> Result<()>;
}

pub trait FavoritesRepository: Send + Sync {
    /// Newest favorites first.
    async fn favorites(&self, traveler_id: i64, limit: usize) -> Result<Vec<FavoriteRecord>>;
    async fn add_favorite(&self, favorite: FavoriteRecord) -> Result<()>;
}

pub trait ChatHistoryRepository: Send + Sync {
    async fn append_chat_message(&self, booking_id: i64, role: ChatRole, content: &str) -> Result<()>;
    /// The last `limit` messages for a booking, oldest first.
    async fn chat_history(&self, booking_id: i64, limit: usize) -> Result<Vec<ChatHistoryEntry>>;
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    bookings: Arc<RwLock<HashMap<i64, BookingRecord>>>,
    preferences: Arc<RwLock<HashMap<i64, Preferences>>>,
    favorites: Arc<RwLock<HashMap<i64, Vec<FavoriteRecord>>>>,
    chat: Arc<RwLock<HashMap<i64, Vec<ChatHistoryEntry>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BookingRepository for MemoryStore {
    async fn get_booking(&self, booking_id: i64) -> Result<Option<BookingRecord>> {
        Ok(self.bookings.read().get(&booking_id).cloned())
    }

    async fn bookings_for_traveler(&self, traveler_id: i64, limit: usize) -> Result<Vec<BookingRecord>> {
        let mut bookings = self
            .bookings
            .read()
            .values()
            .filter(|booking| booking.traveler_id == traveler_id)
            .cloned()
            .collect::<Vec<_>>();
        bookings.sort_by(|a, b| b.start_date.cmp(&a.start_date));
        bookings.truncate(limit);
        Ok(bookings)
    }

    async fn upsert_booking(&self, booking: BookingRecord) -> Result<()> {
        self.bookings.write().insert(booking.booking_id, booking);
        Ok(())
    }
}

impl PreferencesRepository for MemoryStore {
    async fn traveler_preferences(&self, traveler_id: i64) -> Result<Option<Preferences>> {
        Ok(self.preferences.read().get(&traveler_id).cloned())
    }

    async fn upsert_preferences(&self, traveler_id: i64, prefs: &Preferences) -> Result<()> {
        self.preferences.write().insert(traveler_id, prefs.clone());
        Ok(())
    }
}

impl FavoritesRepository for MemoryStore {
    async fn favorites(&self, traveler_id: i64, limit: usize) -> Result<Vec<FavoriteRecord>> {
        let mut favorites = self
            .favorites
            .read()
            .get(&traveler_id)
            .cloned()
            .unwrap_or_default();
        favorites.sort_by(|a, b| b.favorite_id.cmp(&a.favorite_id));
        favorites.truncate(limit);
        Ok(favorites)
    }

    /// Upserts on `favorite_id`, like the sqlite table's primary key.
    async fn add_favorite(&self, favorite: FavoriteRecord) -> Result<()> {
        let mut guard = self.favorites.write();
        for rows in guard.values_mut() {
            rows.retain(|existing| existing.favorite_id != favorite.favorite_id);
        }
        guard.entry(favorite.traveler_id).or_default().push(favorite);
        Ok(())
    }
}

impl ChatHistoryRepository for MemoryStore {
    async fn append_chat_message(&self, booking_id: i64, role: ChatRole, content: &str) -> Result<()> {
        self.chat.write().entry(booking_id).or_default().push(ChatHistoryEntry {
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn chat_history(&self, booking_id: i64, limit: usize) -> Result<Vec<ChatHistoryEntry>> {
        let guard = self.chat.read();
        let Some(messages) = guard.get(&booking_id) else {
            return Ok(Vec::new());
        };
        let skip = messages.len().saturating_sub(limit);
        Ok(messages[skip..].to_vec())
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        // Every connection to `:memory:` opens its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .with_context(|| format!("failed connecting to sqlite at {}", database_url))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bookings (
              booking_id INTEGER PRIMARY KEY,
              traveler_id INTEGER NOT NULL,
              property_id INTEGER,
              property_name TEXT,
              location TEXT,
              start_date TEXT NOT NULL,
              end_date TEXT NOT NULL,
              guests INTEGER,
              party_type TEXT,
              status TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS traveler_preferences (
              traveler_id INTEGER PRIMARY KEY,
              budget TEXT NOT NULL,
              interests_json TEXT NOT NULL,
              mobility_needs TEXT NOT NULL,
              dietary TEXT NOT NULL,
              updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS favorites (
              favorite_id INTEGER PRIMARY KEY,
              traveler_id INTEGER NOT NULL,
              property_id INTEGER NOT NULL,
              name TEXT NOT NULL,
              location TEXT,
              price_per_night REAL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              booking_id INTEGER NOT NULL,
              role TEXT NOT NULL,
              content TEXT NOT NULL,
              created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn booking_from_row(row: &SqliteRow) -> Result<BookingRecord> {
    let start_date: String = row.get("start_date");
    let end_date: String = row.get("end_date");
    Ok(BookingRecord {
        booking_id: row.get("booking_id"),
        traveler_id: row.get("traveler_id"),
        property_id: row.get("property_id"),
        property_name: row.get("property_name"),
        location: row.get("location"),
        start_date: NaiveDate::parse_from_str(&start_date, "%Y-%m-%d")
            .with_context(|| format!("bad stored start_date {start_date}"))?,
        end_date: NaiveDate::parse_from_str(&end_date, "%Y-%m-%d")
            .with_context(|| format!("bad stored end_date {end_date}"))?,
        guests: row
            .get::<Option<i64>, _>("guests")
            .and_then(|value| u32::try_from(value).ok()),
        party_type: row.get("party_type"),
        status: row.get("status"),
    })
}

/// Stored enum columns hold their snake_case wire form; unknown values fall
/// back to the default.
fn parse_stored<T: DeserializeOwned + Default>(value: &str) -> T {
    serde_json::from_value(serde_json::Value::String(value.to_string())).unwrap_or_default()
}

const BOOKING_COLUMNS: &str = "booking_id, traveler_id, property_id, property_name, location, start_date, end_date, guests, party_type, status";

impl BookingRepository for SqliteStore {
    async fn get_booking(&self, booking_id: i64) -> Result<Option<BookingRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE booking_id = ?1"
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(booking_from_row).transpose()
    }

    async fn bookings_for_traveler(&self, traveler_id: i64, limit: usize) -> Result<Vec<BookingRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE traveler_id = ?1 ORDER BY start_date DESC LIMIT ?2"
        ))
        .bind(traveler_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(booking_from_row).collect()
    }

    async fn upsert_booking(&self, booking: BookingRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bookings (booking_id, traveler_id, property_id, property_name, location,
                                  start_date, end_date, guests, party_type, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(booking_id) DO UPDATE SET
              traveler_id=excluded.traveler_id,
              property_id=excluded.property_id,
              property_name=excluded.property_name,
              location=excluded.location,
              start_date=excluded.start_date,
              end_date=excluded.end_date,
              guests=excluded.guests,
              party_type=excluded.party_type,
              status=excluded.status
            "#,
        )
        .bind(booking.booking_id)
        .bind(booking.traveler_id)
        .bind(booking.property_id)
        .bind(&booking.property_name)
        .bind(&booking.location)
        .bind(booking.start_date.to_string())
        .bind(booking.end_date.to_string())
        .bind(booking.guests.map(i64::from))
        .bind(&booking.party_type)
        .bind(&booking.status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl PreferencesRepository for SqliteStore {
    async fn traveler_preferences(&self, traveler_id: i64) -> Result<Option<Preferences>> {
        let row = sqlx::query(
            r#"
            SELECT budget, interests_json, mobility_needs, dietary
            FROM traveler_preferences
            WHERE traveler_id = ?1
            "#,
        )
        .bind(traveler_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let interests_json: String = row.get("interests_json");
        Ok(Some(Preferences {
            budget: parse_stored::<Budget>(&row.get::<String, _>("budget")),
            interests: serde_json::from_str(&interests_json).unwrap_or_default(),
            mobility_needs: parse_stored::<Mobility>(&row.get::<String, _>("mobility_needs")),
            dietary: parse_stored::<Dietary>(&row.get::<String, _>("dietary")),
        }))
    }

    async fn upsert_preferences(&self, traveler_id: i64, prefs: &Preferences) -> Result<()> {
        let interests_json = serde_json::to_string(&prefs.interests)?;

        sqlx::query(
            r#"
            INSERT INTO traveler_preferences (traveler_id, budget, interests_json, mobility_needs, dietary, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(traveler_id) DO UPDATE SET
              budget=excluded.budget,
              interests_json=excluded.interests_json,
              mobility_needs=excluded.mobility_needs,
              dietary=excluded.dietary,
              updated_at=excluded.updated_at
            "#,
        )
        .bind(traveler_id)
        .bind(prefs.budget.as_str())
        .bind(interests_json)
        .bind(prefs.mobility_needs.as_str())
        .bind(prefs.dietary.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl FavoritesRepository for SqliteStore {
    async fn favorites(&self, traveler_id: i64, limit: usize) -> Result<Vec<FavoriteRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT favorite_id, traveler_id, property_id, name, location, price_per_night
            FROM favorites
            WHERE traveler_id = ?1
            ORDER BY favorite_id DESC
            LIMIT ?2
            "#,
        )
        .bind(traveler_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let favorites = rows
            .into_iter()
            .map(|row| FavoriteRecord {
                favorite_id: row.get("favorite_id"),
                traveler_id: row.get("traveler_id"),
                property_id: row.get("property_id"),
                name: row.get("name"),
                location: row.get("location"),
                price_per_night: row.get("price_per_night"),
            })
            .collect();

        Ok(favorites)
    }

    async fn add_favorite(&self, favorite: FavoriteRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO favorites (favorite_id, traveler_id, property_id, name, location, price_per_night)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(favorite_id) DO UPDATE SET
              traveler_id=excluded.traveler_id,
              property_id=excluded.property_id,
              name=excluded.name,
              location=excluded.location,
              price_per_night=excluded.price_per_night
            "#,
        )
        .bind(favorite.favorite_id)
        .bind(favorite.traveler_id)
        .bind(favorite.property_id)
        .bind(&favorite.name)
        .bind(&favorite.location)
        .bind(favorite.price_per_night)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl ChatHistoryRepository for SqliteStore {
    async fn append_chat_message(&self, booking_id: i64, role: ChatRole, content: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_messages (booking_id, role, content, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(booking_id)
        .bind(role.as_str())
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn chat_history(&self, booking_id: i64, limit: usize) -> Result<Vec<ChatHistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT role, content, created_at FROM (
              SELECT id, role, content, created_at
              FROM chat_messages
              WHERE booking_id = ?1
              ORDER BY id DESC
              LIMIT ?2
            )
            ORDER BY id ASC
            "#,
        )
        .bind(booking_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let history = rows
            .into_iter()
            .filter_map(|row| {
                let role = ChatRole::parse(row.get::<String, _>("role").as_str())?;
                Some(ChatHistoryEntry {
                    role,
                    content: row.get("content"),
                    created_at: row
                        .get::<String, _>("created_at")
                        .parse()
                        .unwrap_or_else(|_| Utc::now()),
                })
            })
            .collect();

        Ok(history)
    }
}

#[derive(Clone)]
pub enum Store {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl Store {
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    pub async fn sqlite(database_url: &str) -> Result<Self> {
        let sqlite = SqliteStore::connect(database_url).await?;
        Ok(Self::Sqlite(sqlite))
    }
}

impl BookingRepository for Store {
    async fn get_booking(&self, booking_id: i64) -> Result<Option<BookingRecord>> {
        match self {
            Store::Memory(store) => store.get_booking(booking_id).await,
            Store::Sqlite(store) => store.get_booking(booking_id).await,
        }
    }

    async fn bookings_for_traveler(&self, traveler_id: i64, limit: usize) -> Result<Vec<BookingRecord>> {
        match self {
            Store::Memory(store) => store.bookings_for_traveler(traveler_id, limit).await,
            Store::Sqlite(store) => store.bookings_for_traveler(traveler_id, limit).await,
        }
    }

    async fn upsert_booking(&self, booking: BookingRecord) -> Result<()> {
        match self {
            Store::Memory(store) => store.upsert_booking(booking).await,
            Store::Sqlite(store) => store.upsert_booking(booking).await,
        }
    }
}

impl PreferencesRepository for Store {
    async fn traveler_preferences(&self, traveler_id: i64) -> Result<Option<Preferences>> {
        match self {
            Store::Memory(store) => store.traveler_preferences(traveler_id).await,
            Store::Sqlite(store) => store.traveler_preferences(traveler_id).await,
        }
    }

    async fn upsert_preferences(&self, traveler_id: i64, prefs: &Preferences) -> Result<()> {
        match self {
            Store::Memory(store) => store.upsert_preferences(traveler_id, prefs).await,
            Store::Sqlite(store) => store.upsert_preferences(traveler_id, prefs).await,
        }
    }
}

impl FavoritesRepository for Store {
    async fn favorites(&self, traveler_id: i64, limit: usize) -> Result<Vec<FavoriteRecord>> {
        match self {
            Store::Memory(store) => store.favorites(traveler_id, limit).await,
            Store::Sqlite(store) => store.favorites(traveler_id, limit).await,
        }
    }

    async fn add_favorite(&self, favorite: FavoriteRecord) -> Result<()> {
        match self {
            Store::Memory(store) => store.add_favorite(favorite).await,
            Store::Sqlite(store) => store.add_favorite(favorite).await,
        }
    }
}

impl ChatHistoryRepository for Store {
    async fn append_chat_message(&self, booking_id: i64, role: ChatRole, content: &str) -> Result<()> {
        match self {
            Store::Memory(store) => store.append_chat_message(booking_id, role, content).await,
            Store::Sqlite(store) => store.append_chat_message(booking_id, role, content).await,
        }
    }

    async fn chat_history(&self, booking_id: i64, limit: usize) -> Result<Vec<ChatHistoryEntry>> {
        match self {
            Store::Memory(store) => store.chat_history(booking_id, limit).await,
            Store::Sqlite(store) => store.chat_history(booking_id, limit).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking(booking_id: i64, traveler_id: i64, start: &str) -> BookingRecord {
        let start_date = NaiveDate::parse_from_str(start, "%Y-%m-%d").unwrap();
        BookingRecord {
            booking_id,
            traveler_id,
            property_id: Some(10),
            property_name: Some("Harbor loft".into()),
            location: Some("Lisbon, PT".into()),
            start_date,
            end_date: start_date,
            guests: Some(2),
            party_type: None,
            status: Some("confirmed".into()),
        }
    }

    async fn exercise_store(store: Store) {
        store.upsert_booking(booking(1, 7, "2024-05-01")).await.unwrap();
        store.upsert_booking(booking(2, 7, "2024-08-01")).await.unwrap();
        store.upsert_booking(booking(3, 8, "2024-09-01")).await.unwrap();

        assert_eq!(store.get_booking(1).await.unwrap(), Some(booking(1, 7, "2024-05-01")));
        assert_eq!(store.get_booking(99).await.unwrap(), None);
        let ids = store
            .bookings_for_traveler(7, 5)
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.booking_id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![2, 1]);

        let prefs = Preferences {
            budget: Budget::High,
            interests: vec!["art".into(), "parks".into()],
            mobility_needs: Mobility::Wheelchair,
            dietary: Dietary::GlutenFree,
        };
        store.upsert_preferences(7, &prefs).await.unwrap();
        assert_eq!(store.traveler_preferences(7).await.unwrap(), Some(prefs));
        assert_eq!(store.traveler_preferences(8).await.unwrap(), None);

        for favorite_id in 1..=3 {
            store
                .add_favorite(FavoriteRecord {
                    favorite_id,
                    traveler_id: 7,
                    property_id: 100 + favorite_id,
                    name: format!("Stay {favorite_id}"),
                    location: None,
                    price_per_night: Some(120.0),
                })
                .await
                .unwrap();
        }
        let favorites = store.favorites(7, 2).await.unwrap();
        assert_eq!(favorites.len(), 2);
        assert_eq!(favorites[0].favorite_id, 3);

        store
            .add_favorite(FavoriteRecord {
                favorite_id: 2,
                traveler_id: 7,
                property_id: 102,
                name: "Stay 2 renamed".into(),
                location: Some("Porto, PT".into()),
                price_per_night: Some(95.0),
            })
            .await
            .unwrap();
        let favorites = store.favorites(7, 10).await.unwrap();
        assert_eq!(favorites.len(), 3);
        assert_eq!(favorites[1].name, "Stay 2 renamed");

        for (role, text) in [
            (ChatRole::User, "first"),
            (ChatRole::Assistant, "second"),
            (ChatRole::User, "third"),
        ] {
            store.append_chat_message(1, role, text).await.unwrap();
        }
        let history = store.chat_history(1, 2).await.unwrap();
        let contents = history.iter().map(|entry| entry.content.as_str()).collect::<Vec<_>>();
        assert_eq!(contents, vec!["second", "third"]);
        assert_eq!(history[0].role, ChatRole::Assistant);
        assert!(store.chat_history(2, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_store_round_trips_records() {
        exercise_store(Store::memory()).await;
    }

    #[tokio::test]
    async fn sqlite_store_round_trips_records() {
        let store = Store::sqlite("sqlite::memory:").await.unwrap();
        exercise_store(store).await;
    }

    #[test]
    fn unknown_stored_enum_values_default() {
        assert_eq!(parse_stored::<Dietary>("carnivore"), Dietary::None);
        assert_eq!(parse_stored::<Mobility>("limited_walk"), Mobility::LimitedWalk);
    }
}
