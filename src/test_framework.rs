use serde::{Deserialize, Serialize};

/// Handle to one test as selected for a scoped run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSelection {
    /// Index of the test in the baseline run's ordered result sequence.
    pub id: usize,
    pub name: String,
}

/// A test-framework collaborator produces the snippet that, injected into
/// the project's test-hook entry point, restricts execution to exactly the
/// selected tests.
pub trait TestFramework: Send + Sync {
    fn filter(&self, selected_tests: &[TestSelection]) -> String;
}
