//! Transaction configuration.

/// Configuration shared by every transaction a factory creates.
#[derive(Debug, Clone)]
pub struct Config {
    /// How many times the committing event is re-raised for objects that
    /// listeners add to the commit set.
    pub max_committing_rounds: usize,

    /// Whether mandatory relations are checked during commit validation.
    pub validate_mandatory_relations: bool,

    /// Whether non-nullable properties are checked during commit validation.
    pub validate_property_nullability: bool,

    /// Whether unreferenced, unchanged endpoints are dropped from the
    /// registry when their last opposite registration goes away.
    pub collect_unused_endpoints: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_committing_rounds: 8,
            validate_mandatory_relations: true,
            validate_property_nullability: true,
            collect_unused_endpoints: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of committing rounds.
    #[must_use]
    pub const fn max_committing_rounds(mut self, rounds: usize) -> Self {
        self.max_committing_rounds = rounds;
        self
    }

    /// Sets whether mandatory relations are validated at commit.
    #[must_use]
    pub const fn validate_mandatory_relations(mut self, value: bool) -> Self {
        self.validate_mandatory_relations = value;
        self
    }

    /// Sets whether property nullability is validated at commit.
    #[must_use]
    pub const fn validate_property_nullability(mut self, value: bool) -> Self {
        self.validate_property_nullability = value;
        self
    }

    /// Sets whether unused endpoints are collected.
    #[must_use]
    pub const fn collect_unused_endpoints(mut self, value: bool) -> Self {
        self.collect_unused_endpoints = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.max_committing_rounds, 8);
        assert!(config.validate_mandatory_relations);
        assert!(config.validate_property_nullability);
        assert!(config.collect_unused_endpoints);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .validate_mandatory_relations(false)
            .collect_unused_endpoints(false)
            .max_committing_rounds(2);

        assert!(!config.validate_mandatory_relations);
        assert!(!config.collect_unused_endpoints);
        assert_eq!(config.max_committing_rounds, 2);
    }
}
