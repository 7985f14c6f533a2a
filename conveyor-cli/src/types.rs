//! Common types used across CLI modules

use uuid::Uuid;

/// Identifier that can be either a full UUID or an unambiguous prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdOrPrefix {
    Full(Uuid),
    /// Prefix that should uniquely identify a resource
    Prefix(String),
}

impl IdOrPrefix {
    /// Parses as a full UUID first, otherwise treats the input as a prefix
    pub fn parse(input: &str) -> Self {
        match Uuid::parse_str(input) {
            Ok(uuid) => IdOrPrefix::Full(uuid),
            Err(_) => IdOrPrefix::Prefix(input.to_lowercase()),
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            IdOrPrefix::Full(uuid) => Some(*uuid),
            IdOrPrefix::Prefix(_) => None,
        }
    }

    /// Picks the single id among `candidates` that this value designates
    pub fn resolve_among(&self, kind: &str, candidates: &[Uuid]) -> anyhow::Result<Uuid> {
        if let Some(uuid) = self.as_uuid() {
            return Ok(uuid);
        }

        let matches: Vec<&Uuid> = candidates
            .iter()
            .filter(|id| id.to_string().starts_with(&self.to_string()))
            .collect();

        match matches.as_slice() {
            [] => Err(anyhow::anyhow!(
                "No {} found with ID starting with '{}'",
                kind,
                self
            )),
            [id] => Ok(**id),
            _ => {
                let ids: Vec<String> = matches.iter().map(|id| id.to_string()).collect();
                Err(anyhow::anyhow!(
                    "Ambiguous prefix '{}' matches multiple {}s: {}",
                    self,
                    kind,
                    ids.join(", ")
                ))
            }
        }
    }
}

impl std::fmt::Display for IdOrPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdOrPrefix::Full(uuid) => write!(f, "{}", uuid),
            IdOrPrefix::Prefix(prefix) => write!(f, "{}", prefix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> Vec<Uuid> {
        vec![
            Uuid::parse_str("3f2b1c00-0000-4000-8000-000000000001").unwrap(),
            Uuid::parse_str("3f2b9a00-0000-4000-8000-000000000002").unwrap(),
            Uuid::parse_str("a1000000-0000-4000-8000-000000000003").unwrap(),
        ]
    }

    #[test]
    fn test_full_uuid_is_taken_as_is() {
        let id = Uuid::new_v4();
        assert_eq!(IdOrPrefix::parse(&id.to_string()), IdOrPrefix::Full(id));
        assert_eq!(IdOrPrefix::parse(&id.to_string()).resolve_among("pipeline", &[]).unwrap(), id);
    }

    #[test]
    fn test_unique_prefix_resolves() {
        let ids = ids();
        let resolved = IdOrPrefix::parse("A1").resolve_among("pipeline", &ids).unwrap();
        assert_eq!(resolved, ids[2]);
    }

    #[test]
    fn test_ambiguous_and_unknown_prefixes() {
        let ids = ids();

        let err = IdOrPrefix::parse("3f2b").resolve_among("execution", &ids).unwrap_err();
        assert!(err.to_string().contains("Ambiguous prefix '3f2b'"));

        let err = IdOrPrefix::parse("ff").resolve_among("execution", &ids).unwrap_err();
        assert!(err.to_string().starts_with("No execution found"));
    }
}
