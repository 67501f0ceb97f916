//! Versioned binary snapshot format.
//!
//! ```text
//! header   magic u32 | version u32 | saved_at i64 (V1 unix millis, V2 unix nanos)
//! body     schema-specific, see SchemaV1 / SchemaV2
//! trailer  crc32 u32 over header + body
//! ```
//!
//! All values are little-endian. Counts are stored as `i32`.

use bytes::{Buf, BufMut};
use chrono::{DateTime, Utc};

use crate::{
    breaker::BreakerStatus,
    config::CoreConfig,
    domain::AgentId,
    error::IntegrityError,
    kinematics::state::REGIME_SLOTS,
    learner::{ProbabilityPredictor, predictor::CalibrationCell},
    persistence::{
        crc::crc32,
        snapshot::{
            AGENT_SLOTS, AgentRecord, BreakerRecord, PersistedSnapshot, ProfileRecord,
            RegimeRecord,
        },
    },
    ring_buffer::RingBuffer,
};

pub const MAGIC: u32 = 0x5143_4F52;
pub const V1: u32 = 1;
pub const V2: u32 = 2;
pub const CURRENT_VERSION: u32 = V2;
pub const HEADER_LEN: usize = 16;
pub const CHECKSUM_LEN: usize = 4;

/// Agent order inside the body, matching [`AgentId::index`].
const AGENT_ORDER: [AgentId; AGENT_SLOTS] = [AgentId::Patient, AgentId::Aggressive];

/// Upper bound on a persisted ring capacity; larger values are treated as corruption.
const MAX_RING_CAPACITY: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    /// Save timestamp in the unit of `version`.
    pub saved_at_raw: i64,
}

/// A decoded snapshot and the format version it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub snapshot: PersistedSnapshot,
    pub version: u32,
}

impl Decoded {
    pub fn is_migrated(&self) -> bool {
        self.version != CURRENT_VERSION
    }
}

// ================================================================================================
// Public API
// ================================================================================================

/// Encodes with the current format version.
pub fn encode(snapshot: &PersistedSnapshot) -> Vec<u8> {
    encode_with::<SchemaV2>(snapshot)
}

/// Encodes with an explicit format version.
pub fn encode_version(
    snapshot: &PersistedSnapshot,
    version: u32,
) -> Result<Vec<u8>, IntegrityError> {
    match version {
        V1 => Ok(encode_with::<SchemaV1>(snapshot)),
        V2 => Ok(encode_with::<SchemaV2>(snapshot)),
        other => Err(IntegrityError::UnsupportedVersion(other)),
    }
}

/// Checks length, magic, version and checksum without decoding the body.
pub fn verify(bytes: &[u8]) -> Result<Header, IntegrityError> {
    let min = HEADER_LEN + CHECKSUM_LEN;
    if bytes.len() < min {
        return Err(IntegrityError::Truncated {
            needed: min,
            available: bytes.len(),
        });
    }

    let mut header = &bytes[..HEADER_LEN];
    let magic = header.get_u32_le();
    if magic != MAGIC {
        return Err(IntegrityError::BadMagic(magic));
    }
    let version = header.get_u32_le();
    if !matches!(version, V1 | V2) {
        return Err(IntegrityError::UnsupportedVersion(version));
    }
    let saved_at_raw = header.get_i64_le();

    let (payload, mut trailer) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    let stored = trailer.get_u32_le();
    let computed = crc32(payload);
    if stored != computed {
        return Err(IntegrityError::ChecksumMismatch { stored, computed });
    }

    Ok(Header {
        version,
        saved_at_raw,
    })
}

/// Verifies and decodes a snapshot, migrating older versions and clamping
/// every field into its valid domain.
pub fn decode(bytes: &[u8], cfg: &CoreConfig) -> Result<Decoded, IntegrityError> {
    let header = verify(bytes)?;
    let mut reader = Reader::new(&bytes[HEADER_LEN..bytes.len() - CHECKSUM_LEN]);
    let (saved_at, body) = match header.version {
        V1 => (
            SchemaV1::decode_saved_at(header.saved_at_raw)?,
            SchemaV1::decode_body(&mut reader, cfg)?,
        ),
        V2 => (
            SchemaV2::decode_saved_at(header.saved_at_raw)?,
            SchemaV2::decode_body(&mut reader, cfg)?,
        ),
        other => return Err(IntegrityError::UnsupportedVersion(other)),
    };
    if reader.remaining() != 0 {
        return Err(IntegrityError::TrailingBytes(reader.remaining()));
    }

    let mut snapshot = PersistedSnapshot {
        saved_at,
        agents: body.agents,
        predictor: body.predictor,
        breaker: body.breaker,
    };
    snapshot.sanitize(cfg);

    Ok(Decoded {
        snapshot,
        version: header.version,
    })
}

fn encode_with<S: Schema>(snapshot: &PersistedSnapshot) -> Vec<u8> {
    let mut out = Vec::with_capacity(1024);
    out.put_u32_le(MAGIC);
    out.put_u32_le(S::VERSION);
    out.put_i64_le(S::encode_saved_at(snapshot.saved_at));
    S::encode_body(snapshot, &mut out);
    let crc = crc32(&out);
    out.put_u32_le(crc);
    out
}

// ================================================================================================
// Schemas
// ================================================================================================

struct Body {
    agents: [AgentRecord; AGENT_SLOTS],
    predictor: ProbabilityPredictor,
    breaker: BreakerRecord,
}

trait Schema {
    const VERSION: u32;

    fn encode_saved_at(at: DateTime<Utc>) -> i64;

    fn decode_saved_at(raw: i64) -> Result<DateTime<Utc>, IntegrityError>;

    fn encode_body(snapshot: &PersistedSnapshot, out: &mut Vec<u8>);

    fn decode_body(r: &mut Reader<'_>, cfg: &CoreConfig) -> Result<Body, IntegrityError>;
}

/// Prior format: no learning rates, risk windows or zone tables.
struct SchemaV1;

impl Schema for SchemaV1 {
    const VERSION: u32 = V1;

    fn encode_saved_at(at: DateTime<Utc>) -> i64 {
        at.timestamp_millis()
    }

    fn decode_saved_at(raw: i64) -> Result<DateTime<Utc>, IntegrityError> {
        DateTime::from_timestamp_millis(raw).ok_or_else(|| IntegrityError::InvalidField {
            field: "saved_at",
            msg: format!("{raw} ms is out of range"),
        })
    }

    fn encode_body(snapshot: &PersistedSnapshot, out: &mut Vec<u8>) {
        for agent in &snapshot.agents {
            for profile in [&agent.live, &agent.challenger] {
                profile.iter().for_each(|r| put_regime(out, r, false));
            }
            out.put_f64_le(agent.capital_allocation);
            out.put_i32_le(count_to_i32(agent.swap_count));
        }
        snapshot.predictor.regimes.iter().for_each(|c| put_cell(out, c));
        put_breaker(out, &snapshot.breaker);
    }

    fn decode_body(r: &mut Reader<'_>, cfg: &CoreConfig) -> Result<Body, IntegrityError> {
        let mut agents = AGENT_ORDER.map(|id| AgentRecord::fresh(cfg.agent(id)));
        for (agent, id) in agents.iter_mut().zip(AGENT_ORDER) {
            let initial = cfg.agent(id).initial_learning_rate;
            agent.live = r.profile(|r| r.regime(initial))?;
            agent.challenger = r.profile(|r| r.regime(initial))?;
            agent.capital_allocation = r.f64()?;
            agent.swap_count = r.count()?;
        }

        let mut predictor = ProbabilityPredictor::default();
        for cell in predictor.regimes.iter_mut() {
            *cell = r.cell()?;
        }

        // Cross-version migration resumes in the most conservative state
        let mut breaker = r.breaker()?;
        breaker.status = BreakerStatus::Halted;

        Ok(Body {
            agents,
            predictor,
            breaker,
        })
    }
}

/// Current format.
struct SchemaV2;

impl Schema for SchemaV2 {
    const VERSION: u32 = V2;

    /// Saturates outside the nanosecond range (years 1677 to 2262).
    fn encode_saved_at(at: DateTime<Utc>) -> i64 {
        at.timestamp_nanos_opt()
            .unwrap_or(if at.timestamp() < 0 { i64::MIN } else { i64::MAX })
    }

    fn decode_saved_at(raw: i64) -> Result<DateTime<Utc>, IntegrityError> {
        Ok(DateTime::from_timestamp_nanos(raw))
    }

    fn encode_body(snapshot: &PersistedSnapshot, out: &mut Vec<u8>) {
        for agent in &snapshot.agents {
            for profile in [&agent.live, &agent.challenger] {
                profile.iter().for_each(|r| put_regime(out, r, true));
            }
            out.put_f64_le(agent.capital_allocation);
            out.put_i32_le(count_to_i32(agent.swap_count));
            out.put_i32_le(count_to_i32(agent.consecutive_losses));

            let ring = &agent.risk_window;
            out.put_i32_le(usize_to_i32(ring.capacity()));
            out.put_i32_le(usize_to_i32(ring.head()));
            out.put_i32_le(usize_to_i32(ring.len()));
            ring.slots().iter().for_each(|x| out.put_f64_le(*x));
        }

        let p = &snapshot.predictor;
        p.regimes
            .iter()
            .chain(p.chi_zones.iter())
            .chain(p.accel_zones.iter())
            .for_each(|c| put_cell(out, c));
        put_breaker(out, &snapshot.breaker);
    }

    fn decode_body(r: &mut Reader<'_>, cfg: &CoreConfig) -> Result<Body, IntegrityError> {
        let mut agents = AGENT_ORDER.map(|id| AgentRecord::fresh(cfg.agent(id)));
        for (agent, id) in agents.iter_mut().zip(AGENT_ORDER) {
            let initial = cfg.agent(id).initial_learning_rate;
            agent.live = r.profile(|r| r.regime_with_rate(initial))?;
            agent.challenger = r.profile(|r| r.regime_with_rate(initial))?;
            agent.capital_allocation = r.f64()?;
            agent.swap_count = r.count()?;
            agent.consecutive_losses = r.count()?;
            agent.risk_window = r.ring()?;
        }

        let mut predictor = ProbabilityPredictor::default();
        for cell in predictor
            .regimes
            .iter_mut()
            .chain(predictor.chi_zones.iter_mut())
            .chain(predictor.accel_zones.iter_mut())
        {
            *cell = r.cell()?;
        }

        Ok(Body {
            agents,
            predictor,
            breaker: r.breaker()?,
        })
    }
}

// ================================================================================================
// Field Writers
// ================================================================================================

fn count_to_i32(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn usize_to_i32(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn put_regime(out: &mut Vec<u8>, r: &RegimeRecord, with_rate: bool) {
    out.put_f64_le(r.q_buy);
    out.put_f64_le(r.q_sell);
    out.put_f64_le(r.q_hold);
    out.put_i32_le(count_to_i32(r.trades));
    out.put_i32_le(count_to_i32(r.wins));
    out.put_f64_le(r.pnl);
    out.put_f64_le(r.upside);
    out.put_f64_le(r.downside);
    if with_rate {
        out.put_f64_le(r.learning_rate);
    }
}

fn put_cell(out: &mut Vec<u8>, c: &CalibrationCell) {
    out.put_f64_le(c.win_rate);
    out.put_i32_le(count_to_i32(c.count));
}

fn put_breaker(out: &mut Vec<u8>, b: &BreakerRecord) {
    out.put_i32_le(b.status.code());
    out.put_f64_le(b.peak_equity);
}

// ================================================================================================
// Guarded Reader
// ================================================================================================

/// Cursor over the snapshot body. Every read checks the remaining length
/// first, so a short buffer yields [`IntegrityError::Truncated`] instead of a panic.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize) -> Result<(), IntegrityError> {
        if self.buf.remaining() < needed {
            return Err(IntegrityError::Truncated {
                needed,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn f64(&mut self) -> Result<f64, IntegrityError> {
        self.ensure(8)?;
        Ok(self.buf.get_f64_le())
    }

    fn i32(&mut self) -> Result<i32, IntegrityError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32_le())
    }

    /// Negative counts clamp to zero.
    fn count(&mut self) -> Result<u32, IntegrityError> {
        Ok(self.i32()?.max(0).unsigned_abs())
    }

    /// Fields shared by every version. The learning rate is set to `initial`.
    fn regime(&mut self, initial: f64) -> Result<RegimeRecord, IntegrityError> {
        let q_buy = self.f64()?;
        let q_sell = self.f64()?;
        let q_hold = self.f64()?;
        let trades = self.count()?;
        let wins = self.count()?;
        let pnl = self.f64()?;
        let upside = self.f64()?;
        let downside = self.f64()?;
        Ok(RegimeRecord {
            q_buy,
            q_sell,
            q_hold,
            trades,
            wins,
            pnl,
            upside,
            downside,
            learning_rate: initial,
        })
    }

    fn regime_with_rate(&mut self, initial: f64) -> Result<RegimeRecord, IntegrityError> {
        let mut record = self.regime(initial)?;
        record.learning_rate = self.f64()?;
        Ok(record)
    }

    fn profile(
        &mut self,
        mut read: impl FnMut(&mut Self) -> Result<RegimeRecord, IntegrityError>,
    ) -> Result<ProfileRecord, IntegrityError> {
        let mut out = [RegimeRecord::fresh(0.0); REGIME_SLOTS];
        for slot in out.iter_mut() {
            *slot = read(self)?;
        }
        Ok(out)
    }

    fn ring(&mut self) -> Result<RingBuffer<f64>, IntegrityError> {
        let capacity = self.i32()?;
        let head = self.i32()?;
        let len = self.i32()?;

        let capacity = usize::try_from(capacity)
            .ok()
            .filter(|c| (1..=MAX_RING_CAPACITY).contains(c))
            .ok_or_else(|| IntegrityError::InvalidField {
                field: "risk_window.capacity",
                msg: format!("{capacity} outside 1..={MAX_RING_CAPACITY}"),
            })?;
        self.ensure(capacity * 8)?;

        let slots = (0..capacity).map(|_| self.buf.get_f64_le()).collect();
        let head = usize::try_from(head).unwrap_or(0);
        let len = usize::try_from(len).unwrap_or(0);
        Ok(RingBuffer::from_parts(slots, head, len))
    }

    fn cell(&mut self) -> Result<CalibrationCell, IntegrityError> {
        let win_rate = self.f64()?;
        let count = self.count()?;
        Ok(CalibrationCell { win_rate, count })
    }

    fn breaker(&mut self) -> Result<BreakerRecord, IntegrityError> {
        let code = self.i32()?;
        let peak_equity = self.f64()?;
        // Unknown codes resume halted
        let status = BreakerStatus::from_code(code).unwrap_or(BreakerStatus::Halted);
        Ok(BreakerRecord {
            status,
            peak_equity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn snapshot() -> PersistedSnapshot {
        let cfg = CoreConfig::default();
        let now = Utc.timestamp_millis_opt(1_714_000_000_123).unwrap();
        let mut snap = PersistedSnapshot::fresh(&cfg, now);
        snap.agents[0].live[0].q_buy = 0.42;
        snap.agents[0].live[0].trades = 12;
        snap.agents[0].live[0].wins = 7;
        snap.agents[0].live[0].learning_rate = 0.05;
        snap.agents[1].risk_window.push(-1.0);
        snap.agents[1].risk_window.push(2.0);
        snap.agents[1].consecutive_losses = 0;
        snap.predictor.chi_zones[3] = CalibrationCell {
            win_rate: 0.75,
            count: 4,
        };
        snap.breaker.peak_equity = 12_500.0;
        snap
    }

    /// Every regime record, allocation, counter and calibration cell carries a
    /// distinct in-domain value.
    fn filled_snapshot(cfg: &CoreConfig, now: DateTime<Utc>) -> PersistedSnapshot {
        let mut snap = PersistedSnapshot::fresh(cfg, now);
        let mut k = 0.0;
        for (agent, id) in snap.agents.iter_mut().zip(AGENT_ORDER) {
            let rates = cfg.agent(id);
            let rate = (rates.learning_rate_floor + rates.initial_learning_rate) / 2.0;
            for record in agent.live.iter_mut().chain(agent.challenger.iter_mut()) {
                k += 1.0;
                *record = RegimeRecord {
                    q_buy: 0.1 * k - 0.5,
                    q_sell: -0.03 * k,
                    q_hold: 0.01 * k,
                    trades: 10 + k as u32,
                    wins: 3 + k as u32 % 5,
                    pnl: 1.25 * k - 4.0,
                    upside: 2.5 * k,
                    downside: 0.75 * k,
                    learning_rate: rate,
                };
            }
            agent.capital_allocation = 0.05 * k;
            agent.swap_count = k as u32 / 4;
        }
        for (i, cell) in snap.predictor.regimes.iter_mut().enumerate() {
            *cell = CalibrationCell {
                win_rate: 0.3 + 0.1 * i as f64,
                count: 7 + i as u32,
            };
        }
        snap.breaker.peak_equity = 31_337.5;
        snap
    }

    // ============================================================================================
    // Round Trips
    // ============================================================================================

    #[test]
    fn current_version_roundtrip() {
        let cfg = CoreConfig::default();
        let snap = snapshot();
        let decoded = decode(&encode(&snap), &cfg).unwrap();
        assert_eq!(decoded.version, CURRENT_VERSION);
        assert!(!decoded.is_migrated());
        assert_eq!(decoded.snapshot, snap);
    }

    #[test]
    fn current_version_keeps_sub_millisecond_saved_at() {
        let cfg = CoreConfig::default();
        let now = Utc.timestamp_nanos(1_714_000_000_123_456_789);
        let snap = filled_snapshot(&cfg, now);

        let decoded = decode(&encode(&snap), &cfg).unwrap();
        assert_eq!(decoded.snapshot.saved_at, now);
        assert_eq!(decoded.snapshot, snap);
    }

    #[test]
    fn default_state_roundtrip() {
        let cfg = CoreConfig::default();
        let snap = PersistedSnapshot::fresh(&cfg, Utc.timestamp_nanos(1_714_000_000_000_000_001));
        assert_eq!(decode(&encode(&snap), &cfg).unwrap().snapshot, snap);
    }

    #[test]
    fn v1_carries_every_field_it_defines() {
        let cfg = CoreConfig::default();
        let now = Utc.timestamp_millis_opt(1_714_000_000_123).unwrap();
        let mut snap = filled_snapshot(&cfg, now);
        snap.agents[0].risk_window.push(-2.0);
        snap.agents[0].consecutive_losses = 1;
        snap.predictor.accel_zones[0] = CalibrationCell {
            win_rate: 0.9,
            count: 3,
        };

        let decoded = decode(&encode_version(&snap, V1).unwrap(), &cfg).unwrap();
        assert_eq!(decoded.version, V1);

        // Fields absent from V1 come back at their defaults
        let mut expected = snap.clone();
        for (agent, id) in expected.agents.iter_mut().zip(AGENT_ORDER) {
            let fresh = AgentRecord::fresh(cfg.agent(id));
            let initial = cfg.agent(id).initial_learning_rate;
            agent
                .live
                .iter_mut()
                .chain(agent.challenger.iter_mut())
                .for_each(|r| r.learning_rate = initial);
            agent.consecutive_losses = fresh.consecutive_losses;
            agent.risk_window = fresh.risk_window;
        }
        expected.predictor.chi_zones = Default::default();
        expected.predictor.accel_zones = Default::default();
        expected.breaker.status = BreakerStatus::Halted;

        assert_eq!(decoded.snapshot, expected);
    }

    #[test]
    fn v1_saved_at_has_millisecond_resolution() {
        let cfg = CoreConfig::default();
        let snap = PersistedSnapshot::fresh(&cfg, Utc.timestamp_nanos(1_714_000_000_123_456_789));
        let decoded = decode(&encode_version(&snap, V1).unwrap(), &cfg).unwrap();
        assert_eq!(
            decoded.snapshot.saved_at,
            Utc.timestamp_millis_opt(1_714_000_000_123).unwrap()
        );
    }

    // ============================================================================================
    // Migration & Integrity
    // ============================================================================================

    #[test]
    fn v1_migration_defaults_new_fields_and_halts() {
        let cfg = CoreConfig::default();
        let snap = snapshot();
        let bytes = encode_version(&snap, 1).unwrap();
        let decoded = decode(&bytes, &cfg).unwrap();

        assert!(decoded.is_migrated());
        let s = &decoded.snapshot;
        assert_eq!(s.agents[0].live[0].q_buy, 0.42);
        assert_eq!(s.agents[0].live[0].learning_rate, cfg.patient.initial_learning_rate);
        assert!(s.agents[1].risk_window.is_empty());
        assert_eq!(s.predictor.chi_zones[3], CalibrationCell::default());
        assert_eq!(s.breaker.status, BreakerStatus::Halted);
        assert_eq!(s.breaker.peak_equity, 12_500.0);
    }

    #[test]
    fn every_single_byte_flip_is_detected() {
        let cfg = CoreConfig::default();
        let bytes = encode(&snapshot());
        for i in 0..bytes.len() - CHECKSUM_LEN {
            let mut damaged = bytes.clone();
            damaged[i] ^= 0x01;
            assert!(decode(&damaged, &cfg).is_err(), "flip at byte {i} went unnoticed");
        }
    }

    #[test]
    fn header_failures_are_classified() {
        let cfg = CoreConfig::default();
        let bytes = encode(&snapshot());

        assert!(matches!(
            decode(&bytes[..10], &cfg),
            Err(IntegrityError::Truncated { .. })
        ));

        let mut bad_magic = bytes.clone();
        bad_magic[0] = 0;
        assert!(matches!(decode(&bad_magic, &cfg), Err(IntegrityError::BadMagic(_))));

        assert_eq!(
            encode_version(&snapshot(), 9).unwrap_err(),
            IntegrityError::UnsupportedVersion(9)
        );
    }

    #[test]
    fn truncated_body_with_valid_checksum_is_rejected() {
        let cfg = CoreConfig::default();
        let bytes = encode(&snapshot());

        // Drop the breaker record but re-seal with a matching checksum
        let mut short = bytes[..bytes.len() - CHECKSUM_LEN - 12].to_vec();
        let crc = crc32(&short);
        short.put_u32_le(crc);

        assert!(matches!(
            decode(&short, &cfg),
            Err(IntegrityError::Truncated { .. })
        ));
    }
}
