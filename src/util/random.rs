use rand::Rng;
use std::ops::RangeInclusive;
#[cfg(test)] use std::sync::Mutex;



#[cfg(test)]
/// automock expectations for static methods are global - hold this lock to avoid races
pub static MOCK_RANDOM_MUTEX: Mutex<()> = Mutex::new(());

/// Source of the dice rolls that drive session id allocation and the simulator's drop / delay
///  decisions. Static methods keep it out of the engines' state; tests swap in `MockRandom`.
#[cfg_attr(test, mockall::automock)]
pub trait Random: Send + Sync + 'static {
    fn gen_u32_range(range: RangeInclusive<u32>) -> u32;
}

pub struct RngRandom {}
impl Random for RngRandom {
    fn gen_u32_range(range: RangeInclusive<u32>) -> u32 {
        rand::thread_rng().gen_range(range)
    }
}
