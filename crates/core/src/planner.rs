use chrono::NaiveDate;
use serde_json::{json, Value};

use crate::aggregate::normalize_hits;
use crate::error::ConciergeError;
use crate::models::{ActivityCard, BookingContext, ConciergeResponse, DayPlan, SearchHit, TimeBlock};
use crate::preferences::ResolvedPreferences;
use crate::query::{build_block_queries, build_restaurant_queries};
use crate::weather::WeatherSummary;

pub const BLOCK_CARD_LIMIT: usize = 3;
pub const RESTAURANT_CARD_LIMIT: usize = 6;
pub const BLOCK_RESULTS_PER_QUERY: usize = 6;
pub const RESTAURANT_RESULTS_PER_QUERY: usize = 12;

pub const HEURISTIC_NOTE: &str = "Model assistance unavailable; returning heuristic itinerary.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchSlot {
    Block { day: usize, block: TimeBlock },
    Restaurants,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchTask {
    pub slot: SearchSlot,
    pub queries: Vec<String>,
    pub max_results: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotHits {
    pub slot: SearchSlot,
    pub hits: Vec<SearchHit>,
}

/// Heuristic itinerary plus the structured context handed to the enhancement model.
#[derive(Debug, Clone)]
pub struct AssembledItinerary {
    pub response: ConciergeResponse,
    pub enhancement_context: Value,
}

/// Every date from `start` to `end`, inclusive.
pub fn plan_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|day| *day <= end).collect()
}

/// Builds the heuristic itinerary for one validated booking.
///
/// Assembly happens in two steps so the caller owns all I/O: [`search_tasks`]
/// lists every query batch the plan needs, and [`assemble`] slots whatever
/// hits came back into place by [`SearchSlot`], independent of the order the
/// searches finished in.
///
/// [`search_tasks`]: ItineraryAssembler::search_tasks
/// [`assemble`]: ItineraryAssembler::assemble
#[derive(Debug, Clone)]
pub struct ItineraryAssembler<'a> {
    booking: &'a BookingContext,
    location: &'a str,
    prefs: &'a ResolvedPreferences,
    days: Vec<NaiveDate>,
}

impl<'a> ItineraryAssembler<'a> {
    pub fn new(
        booking: &'a BookingContext,
        prefs: &'a ResolvedPreferences,
    ) -> Result<Self, ConciergeError> {
        booking.validate()?;
        let location = booking.location().ok_or(ConciergeError::MissingLocation)?;

        Ok(Self {
            booking,
            location,
            prefs,
            days: plan_days(booking.start_date, booking.end_date),
        })
    }

    pub fn days(&self) -> &[NaiveDate] {
        &self.days
    }

    pub fn location(&self) -> &str {
        self.location
    }

    /// Day-major, block-ordered search batches followed by the restaurant batch.
    pub fn search_tasks(&self) -> Vec<SearchTask> {
        let mut tasks = Vec::with_capacity(self.days.len() * TimeBlock::ALL.len() + 1);
        for day in 0..self.days.len() {
            for block in TimeBlock::ALL {
                tasks.push(SearchTask {
                    slot: SearchSlot::Block { day, block },
                    queries: build_block_queries(self.location, &self.prefs.prefs, block),
                    max_results: BLOCK_RESULTS_PER_QUERY,
                });
            }
        }
        tasks.push(SearchTask {
            slot: SearchSlot::Restaurants,
            queries: build_restaurant_queries(
                self.location,
                self.prefs.prefs.dietary,
                self.prefs.child_friendly,
            ),
            max_results: RESTAURANT_RESULTS_PER_QUERY,
        });
        tasks
    }

    pub fn assemble(
        &self,
        results: Vec<SlotHits>,
        weather: &WeatherSummary,
        source_label: &str,
    ) -> AssembledItinerary {
        let mut plan = self
            .days
            .iter()
            .map(|date| DayPlan::empty(*date))
            .collect::<Vec<_>>();
        let mut restaurants = Vec::new();

        for SlotHits { slot, hits } in results {
            match slot {
                SearchSlot::Block { day, block } => {
                    if let Some(day_plan) = plan.get_mut(day) {
                        *day_plan.block_mut(block) = normalize_hits(&hits, BLOCK_CARD_LIMIT);
                    }
                }
                SearchSlot::Restaurants => {
                    restaurants = normalize_hits(&hits, RESTAURANT_CARD_LIMIT);
                }
            }
        }

        let prefs = &self.prefs.prefs;
        let mut reasoning_notes = vec![
            format!(
                "Preferences used: dietary={}, mobility={}, budget={}",
                prefs.dietary.as_str(),
                prefs.mobility_needs.as_str(),
                prefs.budget.as_str()
            ),
            format!("Source: {source_label} (titles/snippets normalized)."),
            HEURISTIC_NOTE.to_string(),
        ];
        if let Some(outlook) = weather.summary_text.as_deref() {
            reasoning_notes.push(format!("Weather outlook: {outlook}"));
        }

        let response = ConciergeResponse {
            plan,
            restaurants,
            packing_checklist: weather.packing.clone(),
            reasoning_notes,
        };
        let enhancement_context = self.enhancement_context(&response, weather);

        AssembledItinerary {
            response,
            enhancement_context,
        }
    }

    /// Convenience for callers whose search is synchronous, such as tests and
    /// offline tooling.
    pub fn assemble_with<F>(
        &self,
        weather: &WeatherSummary,
        source_label: &str,
        mut search: F,
    ) -> AssembledItinerary
    where
        F: FnMut(&SearchTask) -> Vec<SearchHit>,
    {
        let results = self
            .search_tasks()
            .iter()
            .map(|task| SlotHits {
                slot: task.slot,
                hits: search(task),
            })
            .collect();
        self.assemble(results, weather, source_label)
    }

    fn enhancement_context(&self, response: &ConciergeResponse, weather: &WeatherSummary) -> Value {
        let day_suggestions = response
            .plan
            .iter()
            .map(|day| {
                let blocks = TimeBlock::ALL
                    .iter()
                    .map(|block| {
                        let cards = day.block(*block).iter().map(card_suggestion).collect::<Vec<_>>();
                        (block.as_str().to_string(), Value::Array(cards))
                    })
                    .collect::<serde_json::Map<_, _>>();
                json!({ "date": day.date.to_string(), "blocks": blocks })
            })
            .collect::<Vec<_>>();

        let today = weather.today().map(|today| {
            json!({
                "summary": today.description,
                "temp_min_c": today.temp_min_c,
                "temp_max_c": today.temp_max_c,
                "precip_probability": today.precip_probability,
                "forecast": weather.forecast,
            })
        });

        json!({
            "booking": {
                "location": self.location,
                "start_date": self.booking.start_date.to_string(),
                "end_date": self.booking.end_date.to_string(),
                "guests": self.booking.guests,
                "party_type": self.booking.party_type,
            },
            "preferences": self.prefs,
            "weather": today,
            "weather_forecast": weather.forecast,
            "day_suggestions": day_suggestions,
            "restaurant_suggestions": response.restaurants.iter().map(card_suggestion).collect::<Vec<_>>(),
            "default_packing": response.packing_checklist,
            "weather_overview": weather.summary_text,
        })
    }
}

fn card_suggestion(card: &ActivityCard) -> Value {
    json!({
        "title": card.title,
        "url": card.url,
        "price_tier": card.price_tier,
        "tags": card.tags,
        "wheelchair_friendly": card.wheelchair_friendly,
        "child_friendly": card.child_friendly,
    })
}
