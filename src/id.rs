//! Time-based identifier generation for accounts and transfers.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

struct IdState {
    millis: u64,
    random: u128,
}

static LAST: Mutex<IdState> = Mutex::new(IdState { millis: 0, random: 0 });

/// Generate a unique, time-ordered 128-bit identifier.
///
/// The high 48 bits are milliseconds since the Unix epoch and the low 80
/// bits are random, incremented to keep ids generated within the same
/// millisecond strictly monotonic in this process. Any scheme that yields
/// globally unique ids works for the cluster; this one additionally sorts
/// by creation time.
pub fn id() -> u128 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0);

    let mut last = LAST.lock();
    if now > last.millis {
        last.millis = now;
        last.random = rand::random::<u128>() & ((1u128 << 80) - 1);
    } else {
        // Same or regressed millisecond: bump the random part instead.
        last.random += 1;
    }
    (u128::from(last.millis) << 80) | last.random
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_monotonic() {
        let ids: Vec<u128> = (0..1000).map(|_| id()).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn ids_embed_the_wall_clock() {
        let before = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64;
        let generated = (id() >> 80) as u64;
        let after = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64;
        assert!(generated >= before && generated <= after);
    }
}
