use crate::config::{IdentityConfig, WordCategory};
use crate::store::{IdentityRecord, IdentityStore, StoreError};
use rand::seq::SliceRandom;
use rand::Rng;

const TECHNOLOGY_NOUNS: &[&str] = &[
    "algorithm", "app", "bandwidth", "byte", "cable", "chip", "cloud", "compiler",
    "computer", "cursor", "database", "diskette", "firewall", "gigabyte", "hardware",
    "internet", "kernel", "keyboard", "laptop", "megabyte", "modem", "monitor",
    "network", "pixel", "printer", "processor", "router", "server", "software",
    "terabyte", "transistor", "widget", "zettabyte",
];

const TIME_NOUNS: &[&str] = &[
    "afternoon", "autumn", "century", "dawn", "day", "decade", "dusk", "evening",
    "fortnight", "hour", "midnight", "millennium", "minute", "moment", "month",
    "morning", "night", "noon", "season", "second", "spring", "summer", "sunrise",
    "sunset", "tomorrow", "twilight", "week", "weekend", "winter", "year",
];

const TRANSPORTATION_NOUNS: &[&str] = &[
    "airplane", "ambulance", "bicycle", "boat", "bus", "cablecar", "canoe", "car",
    "ferry", "freighter", "glider", "helicopter", "jet", "kayak", "locomotive",
    "monorail", "motorcycle", "railway", "rocket", "sailboat", "scooter", "ship",
    "skateboard", "streetcar", "submarine", "subway", "taxi", "tractor", "train",
    "tram", "trolley", "truck", "van", "yacht",
];

const TIME_ADJECTIVES: &[&str] = &[
    "ancient", "brief", "early", "eternal", "fast", "future", "late", "long",
    "modern", "old", "overdue", "past", "prompt", "quick", "rapid", "recent",
    "short", "slow", "swift", "young",
];

const QUANTITY_ADJECTIVES: &[&str] = &[
    "abundant", "ample", "countless", "double", "empty", "endless", "few", "full",
    "heavy", "huge", "infinite", "light", "little", "many", "massive", "numerous",
    "plenty", "scarce", "single", "sparse", "tiny", "triple", "whole",
];

#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error("No unused identity found after {attempts} attempts")]
    ExhaustedRetries { attempts: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Builds noun-adjective-noun local parts and reserves them in the store.
pub struct IdentityGenerator {
    domain: String,
    max_attempts: u32,
    nouns: Vec<&'static str>,
    adjectives: Vec<&'static str>,
}

fn words_for(category: WordCategory, adjective: bool) -> &'static [&'static str] {
    match (category, adjective) {
        (WordCategory::Technology, false) => TECHNOLOGY_NOUNS,
        (WordCategory::Time, false) => TIME_NOUNS,
        (WordCategory::Transportation, false) => TRANSPORTATION_NOUNS,
        (WordCategory::Time, true) => TIME_ADJECTIVES,
        (WordCategory::Quantity, true) => QUANTITY_ADJECTIVES,
        // No word list for this combination
        _ => &[],
    }
}

fn collect_words(categories: &[WordCategory], adjective: bool) -> Vec<&'static str> {
    let mut words: Vec<&'static str> = categories
        .iter()
        .flat_map(|category| words_for(*category, adjective).iter().copied())
        .collect();
    words.sort_unstable();
    words.dedup();
    words
}

impl IdentityGenerator {
    pub fn new(config: &IdentityConfig) -> anyhow::Result<Self> {
        let nouns = collect_words(&config.noun_categories, false);
        let adjectives = collect_words(&config.adjective_categories, true);

        if nouns.is_empty() {
            anyhow::bail!(
                "No nouns available for categories {:?}",
                config.noun_categories
            );
        }
        if adjectives.is_empty() {
            anyhow::bail!(
                "No adjectives available for categories {:?}",
                config.adjective_categories
            );
        }

        Ok(Self {
            domain: config.domain.to_lowercase(),
            max_attempts: config.max_attempts,
            nouns,
            adjectives,
        })
    }

    /// Number of distinct local parts this generator can produce.
    pub fn vocabulary_size(&self) -> usize {
        self.nouns.len() * self.adjectives.len() * self.nouns.len()
    }

    pub fn generate_local_part<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        // Both lists are non-empty, checked in new()
        let first = self.nouns.choose(rng).copied().unwrap_or("node");
        let middle = self.adjectives.choose(rng).copied().unwrap_or("quick");
        let last = self.nouns.choose(rng).copied().unwrap_or("node");
        format!("{first}-{middle}-{last}")
    }

    pub fn generate_address<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        format!("{}@{}", self.generate_local_part(rng), self.domain)
    }

    /// Reserve one previously unused address.
    ///
    /// Each candidate goes through the store's conditional put, so a taken
    /// address costs no write and two concurrent callers can never be handed
    /// the same identity.
    pub async fn reserve(&self, store: &dyn IdentityStore) -> Result<String, ReservationError> {
        for attempt in 1..=self.max_attempts {
            let candidate = self.generate_address(&mut rand::thread_rng());

            if store
                .put_if_absent(&candidate, IdentityRecord::reserved())
                .await?
            {
                log::info!("Reserved identity {candidate} (attempt {attempt})");
                return Ok(candidate);
            }

            log::debug!("Identity {candidate} already taken, retrying");
        }

        log::error!(
            "Gave up reserving an identity after {} attempts",
            self.max_attempts
        );
        Err(ReservationError::ExhaustedRetries {
            attempts: self.max_attempts,
        })
    }

    /// Bulk provisioning: one candidate per slot, no retry on collision.
    ///
    /// Colliding candidates are dropped from the result instead of
    /// overwriting whatever the store already holds for them.
    pub async fn reserve_many(
        &self,
        store: &dyn IdentityStore,
        count: usize,
    ) -> Result<Vec<String>, StoreError> {
        let candidates: Vec<String> = {
            let mut rng = rand::thread_rng();
            (0..count).map(|_| self.generate_address(&mut rng)).collect()
        };

        let mut reserved = Vec::with_capacity(count);
        for candidate in candidates {
            if store
                .put_if_absent(&candidate, IdentityRecord::reserved())
                .await?
            {
                reserved.push(candidate);
            } else {
                log::warn!("Bulk candidate {candidate} collided with an existing identity, skipped");
            }
        }

        log::info!("Bulk reserved {} of {} identities", reserved.len(), count);
        Ok(reserved)
    }
}
