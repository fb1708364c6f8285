//! # Availability Zone Lookup
//!
//! The resolver classifies instances as same-zone or cross-zone relative to
//! the caller. The zone is resolved exactly once at construction, either
//! from an explicit configuration value or from a platform probe.

use std::process::Command;

use tracing::debug;

use crate::core::types::UNKNOWN_ZONE;

/// One-shot availability-zone lookup. Implementations must return
/// [`UNKNOWN_ZONE`] rather than fail.
pub trait ZoneProvider: Send + Sync {
    /// Resolve the caller's availability zone.
    fn zone(&self) -> String;
}

/// [`ZoneProvider`] backed by the EC2 metadata CLI.
///
/// Runs `/opt/aws/bin/ec2-metadata -z`, whose output has the shape
/// `placement: us-east-1a`, and takes the second field. Any failure along
/// the way (binary missing, non-zero exit, unexpected shape) yields
/// [`UNKNOWN_ZONE`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Ec2MetadataZone;

const EC2_METADATA_BIN: &str = "/opt/aws/bin/ec2-metadata";

impl ZoneProvider for Ec2MetadataZone {
    fn zone(&self) -> String {
        let output = match Command::new(EC2_METADATA_BIN).arg("-z").output() {
            Ok(output) => output,
            Err(err) => {
                debug!(error = %err, "ec2 metadata probe unavailable");
                return UNKNOWN_ZONE.to_string();
            }
        };
        if !output.status.success() {
            return UNKNOWN_ZONE.to_string();
        }

        let text = String::from_utf8_lossy(&output.stdout);
        parse_placement(&text)
    }
}

/// A fixed zone, for deployments that know their placement up front and for
/// tests.
#[derive(Debug, Clone)]
pub struct FixedZone(pub String);

impl ZoneProvider for FixedZone {
    fn zone(&self) -> String {
        self.0.clone()
    }
}

fn parse_placement(text: &str) -> String {
    let mut fields = text.trim().split_whitespace();
    match (fields.next(), fields.next(), fields.next()) {
        (Some(_), Some(zone), None) => zone.to_string(),
        _ => UNKNOWN_ZONE.to_string(),
    }
}
