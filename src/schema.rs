//! Collection and field names of the analysis data set.

/// Collection names
pub mod collections {
    pub const PROJECTS: &str = "projects";
    pub const SCENARIOS: &str = "scenarios";
    pub const MODIFICATIONS: &str = "modifications";
    pub const BOOKMARKS: &str = "bookmarks";
    pub const BUNDLES: &str = "bundles";
    pub const REGIONAL_ANALYSES: &str = "regional-analyses";
    /// Only present on deployments that have used aggregation areas
    pub const AGGREGATION_AREAS: &str = "aggregationAreas";
}

/// Field names
pub mod fields {
    pub const GROUP: &str = "group";
    pub const ACCESS_GROUP: &str = "accessGroup";
    pub const PROJECT_ID: &str = "projectId";
    pub const SCENARIO: &str = "scenario";
    pub const SCENARIO_ID: &str = "scenarioId";
    pub const TIMETABLES: &str = "timetables";
    pub const TIMETABLE_ID: &str = "timetableId";
    pub const ENTRIES: &str = "entries";
    pub const ENTRY_ID: &str = "entryId";
    /// Generic identifier carried by embedded timetables and entries
    pub const NESTED_ID: &str = "id";
}

use collections::*;

/// Collections that reference a project directly and always exist
pub const PROJECT_DEPENDENTS: &[&str] = &[BOOKMARKS, BUNDLES, REGIONAL_ANALYSES];

/// Collections that reference a project directly but may be absent
pub const OPTIONAL_PROJECT_DEPENDENTS: &[&str] = &[AGGREGATION_AREAS];

/// Collections every run needs
pub const REQUIRED_COLLECTIONS: &[&str] = &[
    PROJECTS,
    SCENARIOS,
    MODIFICATIONS,
    BOOKMARKS,
    BUNDLES,
    REGIONAL_ANALYSES,
];
