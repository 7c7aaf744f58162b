use std::fmt::{Display, Formatter};
use std::num::IntErrorKind;
use std::str::FromStr;
use std::time::Duration;
use anyhow::{anyhow, bail};
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const MAX_CHANCE: u32 = 100;
pub const MAX_DELAY_TIME_MS: f64 = 100_000.0;


/// Which way a packet travels through the simulator
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Direction {
    /// client -> server, i.e. from the learned peer to the target
    Upstream,
    /// server -> client, i.e. from the target to the learned peer
    Downstream,
}

/// Fault injection parameters for one direction. Chances are integer percentages.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DirectionConditions {
    pub drop_chance: u32,
    pub delay_chance: u32,
    pub delay_time_ms: f64,
}
impl DirectionConditions {
    pub fn new(drop_chance: u32, delay_chance: u32, delay_time_ms: f64) -> DirectionConditions {
        DirectionConditions {
            drop_chance: drop_chance.min(MAX_CHANCE),
            delay_chance: delay_chance.min(MAX_CHANCE),
            delay_time_ms: clamp_delay_time(delay_time_ms),
        }
    }

    /// NB: the fields are public, so the value is clamped again here
    pub fn delay_time(&self) -> Duration {
        Duration::from_secs_f64(clamp_delay_time(self.delay_time_ms) / 1000.0)
    }
}
impl Display for DirectionConditions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "drop={}%, delay={}%, delay_time={} ms", self.drop_chance, self.delay_chance, self.delay_time_ms)
    }
}

fn clamp_delay_time(ms: f64) -> f64 {
    if ms.is_nan() {
        return 0.0;
    }
    ms.clamp(0.0, MAX_DELAY_TIME_MS)
}


/// The simulator's live, operator adjustable configuration
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LinkConditions {
    /// applied to client -> server traffic
    pub client: DirectionConditions,
    /// applied to server -> client traffic
    pub server: DirectionConditions,
}
impl LinkConditions {
    pub fn for_direction(&self, direction: Direction) -> DirectionConditions {
        match direction {
            Direction::Upstream => self.client,
            Direction::Downstream => self.server,
        }
    }

    /// Applies an operator update of the form `key: value, key: value, ...` to the shared
    ///  conditions. Keys that are not mentioned keep their value.
    ///
    /// NB: Fields are applied one at a time in input order, each with its own lock acquisition.
    ///  If a field is malformed, the rest of the input is skipped, but fields before it stay
    ///  applied - the update is not atomic, and concurrent readers may see a mix of old and
    ///  new values in the meantime.
    pub async fn apply_update(shared: &RwLock<LinkConditions>, input: &str) -> anyhow::Result<LinkConditions> {
        for field in input.split(',') {
            let (key, value) = split_field(field)?;

            let key = match ConditionKey::from_str(key) {
                Ok(key) => key,
                Err(e) => {
                    warn!("{} - skipping", e);
                    continue;
                }
            };

            let mut conditions = shared.write().await;
            key.apply(&mut conditions, value)?;
        }

        let updated = *shared.read().await;
        info!("parameters updated:");
        info!("  client: {}", updated.client);
        info!("  server: {}", updated.server);
        Ok(updated)
    }
}
impl Display for LinkConditions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "client: {}; server: {}", self.client, self.server)
    }
}

fn split_field(field: &str) -> anyhow::Result<(&str, &str)> {
    let mut parts = field.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), None) => Ok((key.trim(), value.trim())),
        _ => bail!("expected 'key: value', was {:?}", field.trim()),
    }
}


/// The six operator adjustable parameters
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConditionKey {
    ClientDropChance,
    ClientDelayChance,
    ClientDelayTime,
    ServerDropChance,
    ServerDelayChance,
    ServerDelayTime,
}
impl FromStr for ConditionKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "c_drop_chance" => Ok(ConditionKey::ClientDropChance),
            "c_delay_chance" => Ok(ConditionKey::ClientDelayChance),
            "c_delay_time" => Ok(ConditionKey::ClientDelayTime),
            "s_drop_chance" => Ok(ConditionKey::ServerDropChance),
            "s_delay_chance" => Ok(ConditionKey::ServerDelayChance),
            "s_delay_time" => Ok(ConditionKey::ServerDelayTime),
            _ => Err(anyhow!("unknown parameter {:?}", s)),
        }
    }
}
impl ConditionKey {
    fn apply(self, conditions: &mut LinkConditions, value: &str) -> anyhow::Result<()> {
        match self {
            ConditionKey::ClientDropChance => conditions.client.drop_chance = parse_chance(value)?,
            ConditionKey::ClientDelayChance => conditions.client.delay_chance = parse_chance(value)?,
            ConditionKey::ClientDelayTime => conditions.client.delay_time_ms = parse_delay_time(value)?,
            ConditionKey::ServerDropChance => conditions.server.drop_chance = parse_chance(value)?,
            ConditionKey::ServerDelayChance => conditions.server.delay_chance = parse_chance(value)?,
            ConditionKey::ServerDelayTime => conditions.server.delay_time_ms = parse_delay_time(value)?,
        }
        Ok(())
    }
}

/// integer percentage of any magnitude, clamped to 0..=100
fn parse_chance(value: &str) -> anyhow::Result<u32> {
    match value.parse::<i64>() {
        Ok(raw) => Ok(raw.clamp(0, MAX_CHANCE as i64) as u32),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => Ok(MAX_CHANCE),
            IntErrorKind::NegOverflow => Ok(0),
            _ => bail!("invalid percentage {:?}: {}", value, e),
        },
    }
}

/// milliseconds, possibly fractional, clamped to 0..=100000. Infinity clamps like any other
///  out of range value, NaN is rejected.
fn parse_delay_time(value: &str) -> anyhow::Result<f64> {
    let raw: f64 = value.parse()
        .map_err(|e| anyhow!("invalid delay time {:?}: {}", value, e))?;
    if raw.is_nan() {
        bail!("invalid delay time {:?}", value);
    }
    Ok(clamp_delay_time(raw))
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    fn shared(conditions: LinkConditions) -> RwLock<LinkConditions> {
        RwLock::new(conditions)
    }

    #[rstest]
    #[case::clamped_high("c_drop_chance: 150", DirectionConditions::new(100, 0, 0.0), DirectionConditions::default())]
    #[case::clamped_low("s_delay_chance: -5", DirectionConditions::default(), DirectionConditions::new(0, 0, 0.0))]
    #[case::all_six("c_drop_chance: 1, c_delay_chance: 2, c_delay_time: 3.5, s_drop_chance: 4, s_delay_chance: 5, s_delay_time: 6",
        DirectionConditions::new(1, 2, 3.5), DirectionConditions::new(4, 5, 6.0))]
    #[case::no_spaces("s_drop_chance:100", DirectionConditions::default(), DirectionConditions::new(100, 0, 0.0))]
    #[case::delay_time_clamped("c_delay_time: 250000, s_delay_time: -1", DirectionConditions::new(0, 0, 100_000.0), DirectionConditions::default())]
    #[case::chance_above_i64("c_drop_chance: 99999999999999999999, s_drop_chance: 5", DirectionConditions::new(100, 0, 0.0), DirectionConditions::new(5, 0, 0.0))]
    #[case::chance_below_i64("c_delay_chance: -99999999999999999999, s_delay_chance: 7", DirectionConditions::default(), DirectionConditions::new(0, 7, 0.0))]
    #[case::infinite_delay_time("c_delay_time: inf, s_delay_time: -inf, s_drop_chance: 1", DirectionConditions::new(0, 0, 100_000.0), DirectionConditions::new(1, 0, 0.0))]
    #[case::last_one_wins("c_drop_chance: 10, c_drop_chance: 20", DirectionConditions::new(20, 0, 0.0), DirectionConditions::default())]
    #[case::unknown_key_skipped("x_chance: 10, c_drop_chance: 20", DirectionConditions::new(20, 0, 0.0), DirectionConditions::default())]
    #[tokio::test]
    async fn test_apply_update(#[case] input: &str, #[case] client: DirectionConditions, #[case] server: DirectionConditions) {
        let conditions = shared(LinkConditions::default());
        let updated = LinkConditions::apply_update(&conditions, input).await.unwrap();

        assert_eq!(updated, LinkConditions { client, server });
        assert_eq!(*conditions.read().await, updated);
    }

    #[tokio::test]
    async fn test_unmentioned_keys_keep_their_value() {
        let initial = LinkConditions {
            client: DirectionConditions::new(10, 20, 30.0),
            server: DirectionConditions::new(40, 50, 60.0),
        };
        let conditions = shared(initial);

        LinkConditions::apply_update(&conditions, "s_delay_chance: 0").await.unwrap();

        assert_eq!(*conditions.read().await, LinkConditions {
            client: DirectionConditions::new(10, 20, 30.0),
            server: DirectionConditions::new(40, 0, 60.0),
        });
    }

    #[rstest]
    #[case::non_integer_chance("c_drop_chance: 10, c_delay_chance: 2.5, s_drop_chance: 30", DirectionConditions::new(10, 0, 0.0), DirectionConditions::default())]
    #[case::missing_colon("c_drop_chance: 10, s_drop_chance 30, c_delay_chance: 5", DirectionConditions::new(10, 0, 0.0), DirectionConditions::default())]
    #[case::too_many_colons("s_drop_chance: 30, c_drop_chance: 1: 2", DirectionConditions::default(), DirectionConditions::new(30, 0, 0.0))]
    #[case::non_numeric_time("c_delay_chance: 5, c_delay_time: soon", DirectionConditions::new(0, 5, 0.0), DirectionConditions::default())]
    #[case::nan_time("c_drop_chance: 3, c_delay_time: NaN", DirectionConditions::new(3, 0, 0.0), DirectionConditions::default())]
    #[case::first_field_broken("garbage", DirectionConditions::default(), DirectionConditions::default())]
    #[tokio::test]
    async fn test_malformed_field_keeps_earlier_fields(#[case] input: &str, #[case] client: DirectionConditions, #[case] server: DirectionConditions) {
        let conditions = shared(LinkConditions::default());
        assert!(LinkConditions::apply_update(&conditions, input).await.is_err());
        assert_eq!(*conditions.read().await, LinkConditions { client, server });
    }

    #[test]
    fn test_for_direction() {
        let conditions = LinkConditions {
            client: DirectionConditions::new(1, 2, 3.0),
            server: DirectionConditions::new(4, 5, 6.0),
        };
        assert_eq!(conditions.for_direction(Direction::Upstream), conditions.client);
        assert_eq!(conditions.for_direction(Direction::Downstream), conditions.server);
    }

    #[rstest]
    #[case::negative(-5.0, Duration::ZERO)]
    #[case::nan(f64::NAN, Duration::ZERO)]
    #[case::above_max(1e12, Duration::from_secs(100))]
    #[case(0.0, Duration::ZERO)]
    #[case(1.5, Duration::from_micros(1500))]
    #[case(2000.0, Duration::from_secs(2))]
    fn test_delay_time(#[case] ms: f64, #[case] expected: Duration) {
        assert_eq!(DirectionConditions::new(0, 0, ms).delay_time(), expected);

        // bypassing the constructor's clamping
        let raw = DirectionConditions { drop_chance: 0, delay_chance: 0, delay_time_ms: ms };
        assert_eq!(raw.delay_time(), expected);
    }
}
