//! Confirmation codes: the unique business key of a reservation.
//!
//! A code is three uppercase letters followed by five digits, for example
//! `XQR12345`. [`ConfirmationCodeAllocator`] draws random candidates and asks
//! the store whether each one is already assigned. The check and the insert
//! that follows are not atomic, so the store must still reject a duplicate
//! key on insert; callers re-run allocate-then-insert when that happens.

use std::{fmt, str::FromStr};

use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{DataAccessError, Id};

pub const LETTERS: usize = 3;
pub const DIGITS: usize = 5;
pub const CODE_LEN: usize = LETTERS + DIGITS;

const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Existence check against whatever holds the assigned codes
#[async_trait]
pub trait ConfirmationCodeLookup: Send + Sync {
    /// Whether a reservation with this code currently exists
    async fn exists_by_confirmation_code(
        &self,
        code: ConfirmationCode,
    ) -> Result<bool, DataAccessError>;
}

/// Source of the random symbols a code is built from.
pub trait RandomSource: Send {
    /// Index of a letter in `A..=Z`, in `0..26`
    fn letter(&mut self) -> u8;
    /// Index of a digit in `0..=9`, in `0..10`
    fn digit(&mut self) -> u8;
}

/// [`RandomSource`] backed by a `rand` generator
#[derive(Debug)]
pub struct RngSource<R>(R);

impl<R: Rng> RngSource<R> {
    pub fn new(rng: R) -> Self {
        Self(rng)
    }
}

impl RngSource<StdRng> {
    pub fn from_entropy() -> Self {
        Self(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng + Send> RandomSource for RngSource<R> {
    fn letter(&mut self) -> u8 {
        self.0.gen_range(0..26)
    }

    fn digit(&mut self) -> u8 {
        self.0.gen_range(0..10)
    }
}

#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr,
)]
pub struct ConfirmationCode([u8; CODE_LEN]);

impl ConfirmationCode {
    pub fn generate<R: RandomSource + ?Sized>(source: &mut R) -> Self {
        let mut code = [0u8; CODE_LEN];
        let (letters, digits) = code.split_at_mut(LETTERS);
        letters
            .iter_mut()
            .for_each(|b| *b = b'A' + source.letter() % 26);
        digits
            .iter_mut()
            .for_each(|b| *b = b'0' + source.digit() % 10);
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        // always ASCII
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl Id for ConfirmationCode {}

/// The lowest code, `AAA00000`
impl Default for ConfirmationCode {
    fn default() -> Self {
        Self(*b"AAA00000")
    }
}

impl fmt::Display for ConfirmationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ConfirmationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConfirmationCode")
            .field(&self.as_str())
            .finish()
    }
}

impl FromStr for ConfirmationCode {
    type Err = ConfirmationCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; CODE_LEN] = s
            .as_bytes()
            .try_into()
            .map_err(|_| ConfirmationCodeError::InvalidLength(s.len()))?;
        let (letters, digits) = bytes.split_at(LETTERS);
        if !letters.iter().all(u8::is_ascii_uppercase) || !digits.iter().all(u8::is_ascii_digit) {
            return Err(ConfirmationCodeError::Malformed(s.to_owned()));
        }
        Ok(Self(bytes))
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfirmationCodeError {
    #[error("Confirmation code must be 8 characters, got {0}")]
    InvalidLength(usize),
    #[error("Confirmation code must be 3 uppercase letters and 5 digits: {0:?}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum AllocationError {
    /// The existence check could not reach the store
    #[error("Confirmation code store unavailable: {0}")]
    StoreUnavailable(#[from] DataAccessError),
    /// The store refused the insert although the check passed; re-run allocate-then-insert
    #[error("Confirmation code {code} was taken before it could be stored ({attempts} attempts)")]
    DuplicateKeyRejected {
        code: ConfirmationCode,
        attempts: u32,
    },
    #[error("No free confirmation code after {attempts} attempts")]
    ExhaustedRetries { attempts: u32 },
}

/// Hands out confirmation codes that were free at the time of the check.
///
/// The random source is shared behind a lock that is only held while a
/// candidate is drawn, so one allocator can serve concurrent requests.
#[derive(Debug)]
pub struct ConfirmationCodeAllocator<R = RngSource<StdRng>> {
    source: Mutex<R>,
    max_attempts: Option<u32>,
}

impl ConfirmationCodeAllocator {
    pub fn from_entropy() -> Self {
        Self::new(RngSource::from_entropy())
    }
}

impl<R: RandomSource> ConfirmationCodeAllocator<R> {
    pub fn new(source: R) -> Self {
        Self {
            source: Mutex::new(source),
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    /// Retry forever. Only terminates once the store reports a free code.
    pub fn unbounded(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Draws one candidate without consulting the store
    pub async fn candidate(&self) -> ConfirmationCode {
        let mut source = self.source.lock().await;
        ConfirmationCode::generate(&mut *source)
    }

    /// Returns a code no existing reservation holds.
    ///
    /// Store errors are returned as they are, without retrying. Only reads
    /// from `lookup`, so dropping the future part way leaves nothing behind.
    pub async fn allocate<L>(&self, lookup: &L) -> Result<ConfirmationCode, AllocationError>
    where
        L: ConfirmationCodeLookup + ?Sized,
    {
        let mut attempts = 0;
        loop {
            if let Some(max) = self.max_attempts {
                if attempts >= max {
                    warn!(attempts, "no free confirmation code found");
                    return Err(AllocationError::ExhaustedRetries { attempts });
                }
            }
            attempts += 1;
            let code = self.candidate().await;
            if !lookup.exists_by_confirmation_code(code).await? {
                return Ok(code);
            }
            debug!(%code, attempts, "confirmation code already assigned");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::{HashSet, VecDeque},
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use super::*;

    /// Replays the symbols of the given codes, in order
    pub(crate) struct ScriptedSource(VecDeque<u8>);

    impl ScriptedSource {
        pub(crate) fn codes(codes: &[&str]) -> Self {
            let symbols = codes
                .iter()
                .flat_map(|code| code.bytes())
                .map(|b| match b {
                    b'A'..=b'Z' => b - b'A',
                    b'0'..=b'9' => b - b'0',
                    _ => panic!("not a code symbol: {}", b as char),
                })
                .collect();
            Self(symbols)
        }
    }

    impl RandomSource for ScriptedSource {
        fn letter(&mut self) -> u8 {
            self.0.pop_front().expect("script exhausted")
        }

        fn digit(&mut self) -> u8 {
            self.0.pop_front().expect("script exhausted")
        }
    }

    #[derive(Default)]
    struct TakenCodes {
        taken: HashSet<ConfirmationCode>,
        lookups: AtomicU32,
    }

    #[async_trait]
    impl ConfirmationCodeLookup for TakenCodes {
        async fn exists_by_confirmation_code(
            &self,
            code: ConfirmationCode,
        ) -> Result<bool, DataAccessError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.taken.contains(&code))
        }
    }

    /// A store with no free codes left
    #[derive(Default)]
    struct Saturated {
        lookups: AtomicU32,
    }

    #[async_trait]
    impl ConfirmationCodeLookup for Saturated {
        async fn exists_by_confirmation_code(
            &self,
            _code: ConfirmationCode,
        ) -> Result<bool, DataAccessError> {
            tokio::task::yield_now().await;
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    #[derive(Default)]
    struct Unreachable {
        lookups: AtomicU32,
    }

    #[async_trait]
    impl ConfirmationCodeLookup for Unreachable {
        async fn exists_by_confirmation_code(
            &self,
            _code: ConfirmationCode,
        ) -> Result<bool, DataAccessError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Err(DataAccessError::ConnectionError("connection refused".into()))
        }
    }

    fn code(s: &str) -> ConfirmationCode {
        s.parse().unwrap()
    }

    #[test]
    fn test_generated_codes_match_format() {
        let mut source = RngSource::seeded(7);
        for _ in 0..1000 {
            let generated = ConfirmationCode::generate(&mut source);
            let s = generated.as_str();
            assert_eq!(s.len(), CODE_LEN);
            assert!(s[..LETTERS].bytes().all(|b| b.is_ascii_uppercase()), "{s}");
            assert!(s[LETTERS..].bytes().all(|b| b.is_ascii_digit()), "{s}");
            assert_eq!(code(s), generated);
        }
    }

    #[test]
    fn test_generate_from_scripted_source() {
        let mut source = ScriptedSource::codes(&["XQR12345"]);
        assert_eq!(ConfirmationCode::generate(&mut source).to_string(), "XQR12345");
    }

    #[tokio::test]
    async fn test_allocate_skips_taken_code() {
        let store = TakenCodes {
            taken: HashSet::from([code("AAA00000")]),
            ..Default::default()
        };
        let allocator =
            ConfirmationCodeAllocator::new(ScriptedSource::codes(&["AAA00000", "AAA00001"]));
        assert_eq!(allocator.allocate(&store).await.unwrap(), code("AAA00001"));
        assert_eq!(store.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_allocate_returns_first_free_candidate() {
        let store = TakenCodes::default();
        let allocator = ConfirmationCodeAllocator::new(ScriptedSource::codes(&["XQR12345"]));
        assert_eq!(allocator.allocate(&store).await.unwrap(), code("XQR12345"));
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_allocate_gives_up_after_max_attempts() {
        let store = Saturated::default();
        let allocator = ConfirmationCodeAllocator::new(RngSource::seeded(1));
        match allocator.allocate(&store).await {
            Err(AllocationError::ExhaustedRetries { attempts }) => assert_eq!(attempts, 10),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(store.lookups.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_custom_max_attempts() {
        let store = Saturated::default();
        let allocator = ConfirmationCodeAllocator::new(RngSource::seeded(2)).with_max_attempts(3);
        assert!(matches!(
            allocator.allocate(&store).await,
            Err(AllocationError::ExhaustedRetries { attempts: 3 })
        ));
    }

    #[tokio::test]
    async fn test_unbounded_allocate_never_returns_when_store_is_full() {
        let store = Saturated::default();
        let allocator = ConfirmationCodeAllocator::new(RngSource::seeded(3)).unbounded();
        let result = tokio::time::timeout(Duration::from_millis(50), allocator.allocate(&store)).await;
        assert!(result.is_err(), "allocation should still be spinning");
        assert!(store.lookups.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn test_store_error_is_propagated() {
        let store = Unreachable::default();
        let allocator = ConfirmationCodeAllocator::new(RngSource::seeded(4));
        assert!(matches!(
            allocator.allocate(&store).await,
            Err(AllocationError::StoreUnavailable(DataAccessError::ConnectionError(_)))
        ));
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parse_rejects_malformed_codes() {
        assert_eq!(
            "XQR1234".parse::<ConfirmationCode>(),
            Err(ConfirmationCodeError::InvalidLength(7))
        );
        for s in ["xqr12345", "XQ112345", "XQR1234A", "XQR 2345"] {
            assert_eq!(
                s.parse::<ConfirmationCode>(),
                Err(ConfirmationCodeError::Malformed(s.to_owned()))
            );
        }
        assert!("ÄQR1234".parse::<ConfirmationCode>().is_err());
    }

    #[test]
    fn test_serializes_as_string() {
        let json = serde_json::to_string(&code("XQR12345")).unwrap();
        assert_eq!(json, "\"XQR12345\"");
        assert_eq!(
            serde_json::from_str::<ConfirmationCode>(&json).unwrap(),
            code("XQR12345")
        );
        assert!(serde_json::from_str::<ConfirmationCode>("\"12345XQR\"").is_err());
    }
}
