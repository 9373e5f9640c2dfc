/*!
The eth protocol conformance suite.

Every scenario exists twice: once negotiating eth/65 without request ids and once (with a
`_66` suffix) negotiating eth/66. Scenarios run one after another against a single [`Suite`],
and the broadcast scenarios extend the suite's chain as the remote imports blocks.
*/
pub mod large;
pub mod suite;

use std::fmt;
use std::time::Instant;

use regex::Regex;
use tracing::{event, Level};

use crate::ethtest::suite::{Protocol, Suite};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestCase {
    Status,
    Status66,
    GetBlockHeaders,
    GetBlockHeaders66,
    Broadcast,
    Broadcast66,
    GetBlockBodies,
    GetBlockBodies66,
    LargeAnnounce,
    LargeAnnounce66,
    MaliciousHandshake,
    MaliciousHandshake66,
    MaliciousStatus,
    MaliciousStatus66,
}

impl TestCase {
    pub const ALL: [TestCase; 14] = [
        TestCase::Status,
        TestCase::Status66,
        TestCase::GetBlockHeaders,
        TestCase::GetBlockHeaders66,
        TestCase::Broadcast,
        TestCase::Broadcast66,
        TestCase::GetBlockBodies,
        TestCase::GetBlockBodies66,
        TestCase::LargeAnnounce,
        TestCase::LargeAnnounce66,
        TestCase::MaliciousHandshake,
        TestCase::MaliciousHandshake66,
        TestCase::MaliciousStatus,
        TestCase::MaliciousStatus66,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TestCase::Status => "Status",
            TestCase::Status66 => "Status_66",
            TestCase::GetBlockHeaders => "GetBlockHeaders",
            TestCase::GetBlockHeaders66 => "GetBlockHeaders_66",
            TestCase::Broadcast => "Broadcast",
            TestCase::Broadcast66 => "Broadcast_66",
            TestCase::GetBlockBodies => "GetBlockBodies",
            TestCase::GetBlockBodies66 => "GetBlockBodies_66",
            TestCase::LargeAnnounce => "TestLargeAnnounce",
            TestCase::LargeAnnounce66 => "TestLargeAnnounce_66",
            TestCase::MaliciousHandshake => "TestMaliciousHandshake",
            TestCase::MaliciousHandshake66 => "TestMaliciousHandshake_66",
            TestCase::MaliciousStatus => "TestMaliciousStatus",
            TestCase::MaliciousStatus66 => "TestMaliciousStatus_66",
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            TestCase::Status66
            | TestCase::GetBlockHeaders66
            | TestCase::Broadcast66
            | TestCase::GetBlockBodies66
            | TestCase::LargeAnnounce66
            | TestCase::MaliciousHandshake66
            | TestCase::MaliciousStatus66 => Protocol::Eth66,
            _ => Protocol::Eth65,
        }
    }

    /// Scenarios whose name matches `filter`, in suite order.
    pub fn selected(filter: Option<&Regex>) -> Vec<TestCase> {
        TestCase::ALL
            .iter()
            .copied()
            .filter(|case| filter.map_or(true, |filter| filter.is_match(case.name())))
            .collect()
    }

    async fn run(&self, suite: &mut Suite) -> crate::Result<()> {
        let protocol = self.protocol();
        match self {
            TestCase::Status | TestCase::Status66 => suite.test_status(protocol).await,
            TestCase::GetBlockHeaders | TestCase::GetBlockHeaders66 => {
                suite.test_get_block_headers(protocol).await
            }
            TestCase::Broadcast | TestCase::Broadcast66 => suite.test_broadcast(protocol).await,
            TestCase::GetBlockBodies | TestCase::GetBlockBodies66 => {
                suite.test_get_block_bodies(protocol).await
            }
            TestCase::LargeAnnounce | TestCase::LargeAnnounce66 => {
                suite.test_large_announce(protocol).await
            }
            TestCase::MaliciousHandshake | TestCase::MaliciousHandshake66 => {
                suite.test_malicious_handshake(protocol).await
            }
            TestCase::MaliciousStatus | TestCase::MaliciousStatus66 => {
                suite.test_malicious_status(protocol).await
            }
        }
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    pub case: TestCase,
    /// `None` when the scenario passed
    pub failure: Option<String>,
}

impl TestResult {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Run the selected scenarios in order and print a line per outcome.
pub async fn run_tests(suite: &mut Suite, filter: Option<&Regex>) -> Vec<TestResult> {
    let mut results = vec![];
    for case in TestCase::selected(filter) {
        println!("-- RUN {}", case);
        let started = Instant::now();
        let outcome = case.run(suite).await;
        event!(
            Level::INFO,
            "{} finished in {:?}",
            case,
            Instant::now().duration_since(started)
        );
        let failure = match outcome {
            Ok(()) => {
                println!("-- OK {}", case);
                None
            }
            Err(err) => {
                println!("-- FAIL {}: {}", case, err);
                Some(err.to_string())
            }
        };
        results.push(TestResult { case, failure });
    }
    results
}

/// Print the summary line and return the number of failed scenarios.
pub fn report(results: &[TestResult]) -> usize {
    let passed = results.iter().filter(|result| result.passed()).count();
    println!("{}/{} tests passed.", passed, results.len());
    results.len() - passed
}
