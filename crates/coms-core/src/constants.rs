//! Package-level and wire-level constants.

/// Current version of the coms transport (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "coms";

/// Path segment the server mounts the transport under.
pub const DEFAULT_RESOURCE: &str = "coms";

/// Envelope wire format version written by [`crate::codec::encode`].
pub const WIRE_VERSION: u8 = 1;

/// Largest frame the codec will produce or accept (16 MB).
pub const MAX_ENVELOPE_SIZE: usize = 16 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_semver() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert_eq!(parts.len(), 3, "VERSION must be semver (MAJOR.MINOR.PATCH)");
        for part in parts {
            let _: u32 = part.parse().expect("each semver segment must be a number");
        }
    }

    #[test]
    fn name_is_lowercase() {
        assert_eq!(NAME, NAME.to_lowercase());
    }

    #[test]
    fn max_envelope_size_fits_length_prefix() {
        assert!(u32::try_from(MAX_ENVELOPE_SIZE).is_ok());
    }
}
