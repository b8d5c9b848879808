pub mod aggregate;
pub mod chat;
pub mod error;
pub mod models;
pub mod planner;
pub mod preferences;
pub mod query;
pub mod reconcile;
pub mod text;
pub mod tools;
pub mod weather;

pub use aggregate::{infer_flags, normalize_hits, price_tier_from_text, AccessibilityFlags};
pub use error::ConciergeError;
pub use models::*;
pub use planner::{
    plan_days, AssembledItinerary, ItineraryAssembler, SearchSlot, SearchTask, SlotHits,
};
pub use preferences::{merge_preferences, ResolvedPreferences};
pub use query::{build_block_queries, build_restaurant_queries};
pub use reconcile::{reconcile, reconcile_text, FallbackReason, Reconciliation};
pub use tools::{tool_declarations, ConciergeTool, ToolDeclaration, ToolError};
pub use weather::{normalize_provider_payload, summarize, WeatherPayload, WeatherSummary};
