//! Version scheme for artifacts that carry no version (plain schema files)

use super::{VersionIdentifier, VersionScheme};

pub const NULL_SCHEME_ID: &str = "None";

#[derive(Debug, Clone, Copy, Default)]
pub struct NullVersionScheme;

impl VersionScheme for NullVersionScheme {
    fn id(&self) -> &str {
        NULL_SCHEME_ID
    }

    fn is_valid_namespace(&self, _namespace: &str) -> bool {
        true
    }

    fn version_identifier(&self, _namespace: &str) -> VersionIdentifier {
        self.default_version_identifier()
    }

    fn set_version_identifier(&self, namespace: &str, _version: &VersionIdentifier) -> String {
        namespace.to_string()
    }

    fn base_namespace(&self, namespace: &str) -> String {
        namespace.to_string()
    }

    fn major_version_chain(&self, _namespace: &str) -> Vec<String> {
        Vec::new()
    }

    fn major_version_namespace(&self, namespace: &str) -> String {
        namespace.to_string()
    }

    fn default_file_hint(&self, _namespace: &str, library_name: &str) -> String {
        library_name.to_string()
    }

    fn file_version(&self, _filename: &str) -> Option<VersionIdentifier> {
        None
    }
}
