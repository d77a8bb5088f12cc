//! Small input helpers shared by embedders and tests.

use std::io::Read;

use anyhow::Result;

use crate::hierarchy::{HierarchyDefinition, TypeUniverse};

/// Builds a validated [TypeUniverse] from a reader of a JSON
/// [HierarchyDefinition].
pub fn get_universe_for_reader(rdr: impl Read) -> Result<TypeUniverse> {
    let def: HierarchyDefinition = serde_json::from_reader(rdr)?;
    def.build()
}

#[cfg(test)]
mod tests {
    #[test]
    fn universe_from_json_reader() {
        let json = r#"{
            "extends_relations": [["Integer", "Number"], ["Number", "Object"]],
            "root_handle": "Object"
        }"#;
        let universe = super::get_universe_for_reader(json.as_bytes()).unwrap();
        assert_eq!(universe.len(), 3);
        assert!(universe.lookup("Integer").is_some());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(super::get_universe_for_reader("not json".as_bytes()).is_err());
    }
}
