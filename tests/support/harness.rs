use std::sync::Arc;

use oasis_core::config::Config;
use oasis_core::Oasis;
use uuid::Uuid;

/// In-process test harness analogous to the teacher's `temp_server()`: builds a
/// fully wired `Oasis` with fast, small-value test config so scenario tests don't
/// wait out real control-tick periods.
pub struct TestOasis {
    pub oasis: Arc<Oasis>,
}

pub fn test_oasis() -> TestOasis {
    TestOasis { oasis: Arc::new(Oasis::new(Config::for_tests())) }
}

pub fn session_id() -> Uuid {
    Uuid::new_v4()
}
