pub mod types;

pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = ObservabilityError::configuration("sample_rate must be within [0, 1]");
        assert_eq!(
            err.to_string(),
            "configuration error: sample_rate must be within [0, 1]"
        );

        let err = ObservabilityError::instrumentation("exporter setup failed");
        assert_eq!(
            err.to_string(),
            "instrumentation failure: exporter setup failed"
        );
    }
}
