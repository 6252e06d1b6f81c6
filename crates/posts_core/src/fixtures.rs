//! Clock and demo-data seams used when normalizing remote records.
//!
//! The placeholder API serves posts without an author or timestamps, so the
//! controller asks a [`FixtureSource`] for plausible values. [`RandomFixtures`]
//! draws them from a ChaCha RNG; seeding it makes the output reproducible.

use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use shared::domain::Author;

const AUTHOR_NAMES: &[&str] = &[
    "John Doe",
    "Jane Smith",
    "Alice Johnson",
    "Bob Williams",
    "Emily Clark",
    "Michael Brown",
    "Jessica Miller",
    "David Wilson",
    "Laura Garcia",
    "James Anderson",
    "Rachel Moore",
    "Christopher Taylor",
    "Amanda Davis",
    "Joshua Martinez",
    "Sarah White",
    "Brian Harris",
];

const EMAIL_DOMAINS: &[&str] = &[
    "example.com",
    "test.com",
    "demo.com",
    "sample.com",
    "mocksite.com",
    "sandbox.com",
    "playground.com",
    "devsite.com",
];

const SENTENCE_WORDS: &[&str] = &[
    "post", "new", "color", "open", "apple", "design", "create", "launch", "innovate", "manage",
    "build", "enhance", "develop", "connect", "discover", "achieve", "lead", "grow", "inspire",
    "improve", "succeed", "adjust", "maintain", "integrate", "optimize",
];

const EMAIL_LOCAL_PART_LEN: usize = 6;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub trait FixtureSource: Send + Sync {
    fn author(&self) -> Author;
    /// A creation time no later than `now`.
    fn created_at(&self, now: DateTime<Utc>) -> DateTime<Utc>;
    fn sentence(&self, word_count: usize) -> String;
}

pub struct RandomFixtures {
    rng: Mutex<ChaCha8Rng>,
}

impl RandomFixtures {
    pub fn new() -> Self {
        Self::seeded(rand::rng().random())
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut ChaCha8Rng) -> T) -> T {
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut rng)
    }
}

impl Default for RandomFixtures {
    fn default() -> Self {
        Self::new()
    }
}

fn pick<'a>(rng: &mut ChaCha8Rng, items: &[&'a str]) -> &'a str {
    items[rng.random_range(0..items.len())]
}

fn earliest_created_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

impl FixtureSource for RandomFixtures {
    fn author(&self) -> Author {
        self.with_rng(|rng| {
            let name = pick(rng, AUTHOR_NAMES).to_string();
            let local: String = (0..EMAIL_LOCAL_PART_LEN)
                .map(|_| char::from(BASE36[rng.random_range(0..BASE36.len())]))
                .collect();
            let domain = pick(rng, EMAIL_DOMAINS);
            Author {
                name,
                email: format!("{local}@{domain}"),
            }
        })
    }

    fn created_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let start = earliest_created_at().timestamp_millis();
        let end = now.timestamp_millis();
        if end <= start {
            return now;
        }
        let millis = self.with_rng(|rng| rng.random_range(start..=end));
        Utc.timestamp_millis_opt(millis).single().unwrap_or(now)
    }

    fn sentence(&self, word_count: usize) -> String {
        self.with_rng(|rng| {
            (0..word_count)
                .map(|_| pick(rng, SENTENCE_WORDS))
                .collect::<Vec<_>>()
                .join(" ")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
            .single()
            .expect("valid date")
    }

    #[test]
    fn same_seed_produces_same_authors() {
        let a = RandomFixtures::seeded(42);
        let b = RandomFixtures::seeded(42);
        for _ in 0..5 {
            assert_eq!(a.author(), b.author());
        }
    }

    #[test]
    fn authors_are_populated() {
        let fixtures = RandomFixtures::seeded(7);
        for _ in 0..20 {
            let author = fixtures.author();
            assert!(AUTHOR_NAMES.contains(&author.name.as_str()));
            let (local, domain) = author.email.split_once('@').expect("email has @");
            assert_eq!(local.len(), EMAIL_LOCAL_PART_LEN);
            assert!(EMAIL_DOMAINS.contains(&domain));
        }
    }

    #[test]
    fn created_at_falls_between_2022_and_now() {
        let fixtures = RandomFixtures::seeded(3);
        let now = fixed_now();
        for _ in 0..50 {
            let created = fixtures.created_at(now);
            assert!(created >= earliest_created_at());
            assert!(created <= now);
        }
    }

    #[test]
    fn created_at_before_window_returns_now() {
        let fixtures = RandomFixtures::seeded(3);
        let now = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single().expect("date");
        assert_eq!(fixtures.created_at(now), now);
    }

    #[test]
    fn sentence_has_requested_word_count() {
        let fixtures = RandomFixtures::seeded(11);
        let sentence = fixtures.sentence(10);
        assert_eq!(sentence.split(' ').count(), 10);
        assert!(fixtures.sentence(0).is_empty());
    }
}
