/*!
 # Candle-lighting calendar

 Resolves the eight lighting instants of a Chanukah. [`HebcalProvider`] asks
 the Hebcal calendar service for candle-lighting events at a postal code,
 moving forward a month at a time until all eight nights are found or the
 month budget runs out. [`FixedScheduleProvider`] serves instants known ahead
 of time.
*/

use chrono::{DateTime, Datelike, NaiveDate};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::schedule::{LightingSchedule, Timestamp, NIGHTS};
use crate::{Error, Result};

/// Default Hebcal REST endpoint
pub const HEBCAL_URL: &str = "https://www.hebcal.com/hebcal";

/// Prefix shared by the Chanukah candle event titles
const EVENT_PREFIX: &str = "Chanukah: ";

/// Source of the holiday's lighting instants
pub trait ScheduleProvider: Send {
    /// Resolves the eight lighting instants, or fails with `ScheduleUnavailable`
    fn fetch_schedule(&mut self) -> impl Future<Output = Result<LightingSchedule>> + Send;
}

/// A calendar month being searched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarMonth {
    pub year: i32,
    /// 1-12
    pub month: u32,
}

impl CalendarMonth {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    /// The following month, wrapping December into January
    pub fn next(self) -> Self {
        if self.month >= 12 {
            Self::new(self.year + 1, 1)
        } else {
            Self::new(self.year, self.month + 1)
        }
    }
}

/// Year whose November starts the search on `today`.
///
/// The holiday can run into early January, so a January date still belongs
/// to the previous year's Chanukah.
pub fn default_search_year(today: NaiveDate) -> i32 {
    if today.month() == 1 {
        today.year() - 1
    } else {
        today.year()
    }
}

#[derive(Debug, Deserialize)]
struct CalendarResponse {
    #[serde(default)]
    items: Vec<CalendarEvent>,
}

/// One event returned by the calendar service
#[derive(Debug, Clone, Deserialize)]
pub struct CalendarEvent {
    pub title: String,
    pub date: String,
}

/// Night number (1-8) of a `Chanukah: N Candle(s)` title
pub fn candle_night(title: &str) -> Option<usize> {
    let rest = title.strip_prefix(EVENT_PREFIX)?;
    let (number, unit) = rest.split_once(' ')?;
    if unit != "Candle" && unit != "Candles" {
        return None;
    }
    let night: usize = number.parse().ok()?;
    (1..=NIGHTS).contains(&night).then_some(night)
}

/// Accumulates lighting instants across calendar pages
#[derive(Debug, Default)]
pub struct NightCollector {
    nights: [Option<Timestamp>; NIGHTS],
}

impl NightCollector {
    /// Records every candle event in `events`
    pub fn absorb(&mut self, events: &[CalendarEvent]) -> Result<()> {
        for event in events {
            let Some(night) = candle_night(&event.title) else {
                continue;
            };
            let lighting = DateTime::parse_from_rfc3339(&event.date).map_err(|e| {
                Error::ScheduleUnavailable(format!(
                    "{:?} has no usable lighting time {:?}: {}",
                    event.title, event.date, e
                ))
            })?;
            match self.nights[night - 1] {
                Some(kept) => warn!("Duplicate event for night {}, keeping {}", night, kept),
                None => self.nights[night - 1] = Some(lighting),
            }
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.nights.iter().all(Option::is_some)
    }

    /// Night numbers (1-8) still missing
    pub fn missing(&self) -> Vec<usize> {
        self.nights
            .iter()
            .enumerate()
            .filter(|(_, lighting)| lighting.is_none())
            .map(|(index, _)| index + 1)
            .collect()
    }

    pub fn into_schedule(self) -> Result<LightingSchedule> {
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(Error::ScheduleUnavailable(format!(
                "no candle-lighting event for nights {:?}",
                missing
            )));
        }
        LightingSchedule::new(self.nights.into_iter().flatten().collect())
    }
}

/// Searches month pages starting at `start` until all nights are known.
///
/// At most `1 + max_expansions` pages are requested.
pub async fn collect_schedule<F, Fut>(
    start: CalendarMonth,
    max_expansions: u32,
    mut fetch_month: F,
) -> Result<LightingSchedule>
where
    F: FnMut(CalendarMonth) -> Fut,
    Fut: Future<Output = Result<Vec<CalendarEvent>>>,
{
    let mut collector = NightCollector::default();
    let mut month = start;

    for page in 0..=max_expansions {
        let events = fetch_month(month).await?;
        debug!(
            "{} events in {}-{:02} (page {})",
            events.len(),
            month.year,
            month.month,
            page + 1
        );
        collector.absorb(&events)?;
        if collector.is_complete() {
            return collector.into_schedule();
        }
        month = month.next();
    }

    Err(Error::ScheduleUnavailable(format!(
        "nights {:?} not found within {} months of {}-{:02}",
        collector.missing(),
        max_expansions + 1,
        start.year,
        start.month
    )))
}

/// Hebcal calendar lookup keyed by postal code
#[derive(Debug, Clone)]
pub struct HebcalProvider {
    client: reqwest::Client,
    base_url: String,
    zip_code: String,
    start: CalendarMonth,
    max_month_expansions: u32,
}

impl HebcalProvider {
    /// Create a provider for a postal code
    ///
    /// # Arguments
    ///
    /// * `base_url` - Hebcal endpoint, normally [`HEBCAL_URL`]
    /// * `zip_code` - Location of the menorah
    /// * `start` - First month searched
    /// * `max_month_expansions` - Additional months searched when nights are missing
    pub fn new(
        base_url: impl Into<String>,
        zip_code: impl Into<String>,
        start: CalendarMonth,
        max_month_expansions: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            zip_code: zip_code.into(),
            start,
            max_month_expansions,
        })
    }

    /// Query parameters for one month page
    pub fn query(&self, month: CalendarMonth) -> Vec<(&'static str, String)> {
        vec![
            ("v", "1".into()),
            ("cfg", "json".into()),
            ("maj", "on".into()),
            ("min", "off".into()),
            ("i", "off".into()),
            ("lg", "s".into()),
            ("c", "on".into()),
            ("geo", "zip".into()),
            ("zip", self.zip_code.clone()),
            ("year", month.year.to_string()),
            ("month", month.month.to_string()),
        ]
    }

    #[instrument(skip(self), fields(zip = %self.zip_code))]
    async fn fetch_month(&self, month: CalendarMonth) -> Result<Vec<CalendarEvent>> {
        let unavailable =
            |e: reqwest::Error| Error::ScheduleUnavailable(format!("calendar request failed: {}", e));

        let response: CalendarResponse = self
            .client
            .get(&self.base_url)
            .query(&self.query(month))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(unavailable)?
            .json()
            .await
            .map_err(unavailable)?;

        Ok(response.items)
    }
}

impl ScheduleProvider for HebcalProvider {
    fn fetch_schedule(&mut self) -> impl Future<Output = Result<LightingSchedule>> + Send {
        let provider = self.clone();
        async move {
            info!(
                "Looking up candle-lighting times for {} from {}-{:02}",
                provider.zip_code, provider.start.year, provider.start.month
            );
            let schedule = collect_schedule(provider.start, provider.max_month_expansions, |month| {
                provider.fetch_month(month)
            })
            .await?;
            info!("First night {}, last night {}", schedule.nights()[0], schedule.last());
            Ok(schedule)
        }
    }
}

/// Lighting instants known ahead of time
#[derive(Debug, Clone)]
pub struct FixedScheduleProvider {
    schedule: LightingSchedule,
}

impl FixedScheduleProvider {
    /// Serves a validated list of eight instants
    pub fn new(lighting: Vec<Timestamp>) -> Result<Self> {
        Ok(Self {
            schedule: LightingSchedule::new(lighting)?,
        })
    }

    /// Serves eight consecutive daily instants starting at `first_night`
    pub fn daily(first_night: Timestamp) -> Self {
        Self {
            schedule: LightingSchedule::from_first_night(first_night),
        }
    }
}

impl ScheduleProvider for FixedScheduleProvider {
    fn fetch_schedule(&mut self) -> impl Future<Output = Result<LightingSchedule>> + Send {
        std::future::ready(Ok(self.schedule.clone()))
    }
}
