//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use certd_pki::{
    CaView, CertificateBundle, CertificatePage, CertificateView, CrlSnapshot, OcspCertStatus,
    OcspResponse, RevocationOutcome, SerialNumber,
};

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a serializable value to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => {
                value.write_table(writer)?;
            }
        }
        Ok(())
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// A one-line status message.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Message text.
    pub message: String,
}

impl Message {
    /// A success message.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

impl TableDisplay for Message {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        let mark = if self.success { "✓" } else { "✗" };
        writeln!(writer, "{mark} {}", self.message)?;
        Ok(())
    }
}

impl TableDisplay for CertificateBundle {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Certificate Issued")?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Serial:       {}", self.serial)?;
        if !self.entity_id.is_empty() {
            writeln!(writer, "Entity:       {}", self.entity_id)?;
        }
        writeln!(writer, "Not Before:   {}", timestamp(self.not_before))?;
        writeln!(writer, "Not After:    {}", timestamp(self.not_after))?;
        writeln!(writer)?;
        write!(writer, "{}", self.certificate_pem)?;
        if let Some(key) = &self.private_key_pem {
            write!(writer, "{key}")?;
        }
        write!(writer, "{}", self.ca_chain_pem)?;
        Ok(())
    }
}

impl TableDisplay for CertificateView {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Certificate {}", self.serial)?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Entity:       {}", self.entity_id)?;
        writeln!(writer, "Common Name:  {}", self.common_name)?;
        writeln!(writer, "Status:       {}", self.status)?;
        writeln!(writer, "Issuing CA:   {}", self.ca_id)?;
        writeln!(writer, "Not Before:   {}", timestamp(self.not_before))?;
        writeln!(writer, "Not After:    {}", timestamp(self.not_after))?;
        if !self.ip_addresses.is_empty() {
            let ips: Vec<String> = self.ip_addresses.iter().map(ToString::to_string).collect();
            writeln!(writer, "IP SANs:      {}", ips.join(", "))?;
        }
        if let Some(revocation) = &self.revocation {
            writeln!(
                writer,
                "Revoked:      {} ({})",
                timestamp(revocation.revoked_at),
                revocation.reason
            )?;
        }
        Ok(())
    }
}

impl TableDisplay for CertificatePage {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.certificates.is_empty() {
            writeln!(writer, "No certificates found")?;
            return Ok(());
        }

        writeln!(
            writer,
            "{:<42}  {:<24}  {:<8}  {:<23}",
            "SERIAL", "ENTITY", "STATUS", "NOT AFTER"
        )?;
        writeln!(writer, "{}", "─".repeat(103))?;

        let now = Utc::now();
        for record in &self.certificates {
            writeln!(
                writer,
                "{:<42}  {:<24}  {:<8}  {:<23}",
                record.serial.to_hex(),
                truncate(record.entity_id.as_str(), 24),
                record.effective_status(now).to_string(),
                timestamp(record.not_after)
            )?;
        }

        writeln!(writer)?;
        writeln!(
            writer,
            "Showing {}-{} of {} certificate(s)",
            self.offset + 1,
            self.offset + self.certificates.len() as u64,
            self.total
        )?;
        Ok(())
    }
}

impl TableDisplay for RevocationOutcome {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "✓ Revoked {} ({})", self.serial, self.reason)?;
        match self.crl_number {
            Some(number) => writeln!(writer, "  CRL #{number} published")?,
            None => writeln!(writer, "  CRL regeneration pending")?,
        }
        Ok(())
    }
}

/// Serials revoked by a bulk operation.
#[derive(Debug, Clone, Serialize)]
pub struct SerialList {
    /// Entity whose certificates were revoked.
    pub entity_id: String,
    /// Revoked serials.
    pub revoked: Vec<SerialNumber>,
}

impl TableDisplay for SerialList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.revoked.is_empty() {
            writeln!(writer, "No active certificates for {}", self.entity_id)?;
            return Ok(());
        }
        writeln!(writer, "✓ Revoked {} certificate(s) of {}", self.revoked.len(), self.entity_id)?;
        for serial in &self.revoked {
            writeln!(writer, "  {serial}")?;
        }
        Ok(())
    }
}

impl TableDisplay for CrlSnapshot {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "CRL #{}", self.number)?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Issuer:       {}", self.ca_id)?;
        writeln!(writer, "This Update:  {}", timestamp(self.this_update))?;
        writeln!(writer, "Next Update:  {}", timestamp(self.next_update))?;
        writeln!(writer, "Entries:      {}", self.entries.len())?;
        for entry in &self.entries {
            writeln!(
                writer,
                "  {:<42}  {}  {}",
                entry.serial.to_hex(),
                timestamp(entry.revoked_at),
                entry.reason
            )?;
        }
        Ok(())
    }
}

impl TableDisplay for OcspResponse {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "OCSP Response: {}", self.response_status)?;
        for single in &self.responses {
            match single.status {
                OcspCertStatus::Revoked { revoked_at, reason } => writeln!(
                    writer,
                    "  {}  revoked at {} ({reason})",
                    single.serial,
                    timestamp(revoked_at)
                )?,
                status => writeln!(writer, "  {}  {}", single.serial, status.as_str())?,
            }
            writeln!(writer, "  next update {}", timestamp(single.next_update))?;
        }
        Ok(())
    }
}

/// One CA of the hierarchy, with its remaining lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct CaEntry {
    /// CA details.
    #[serde(flatten)]
    pub view: CaView,
    /// Whole days until expiry; zero once expired.
    pub remaining_days: i64,
    /// Whether this CA signs new certificates.
    pub issuing: bool,
}

/// The CA hierarchy.
#[derive(Debug, Clone, Serialize)]
pub struct CaList {
    /// Root first, then intermediates in registration order.
    pub authorities: Vec<CaEntry>,
}

impl TableDisplay for CaList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(
            writer,
            "{:<12}  {:<32}  {:<23}  {:>6}  {:<7}",
            "KIND", "COMMON NAME", "NOT AFTER", "DAYS", "ISSUING"
        )?;
        writeln!(writer, "{}", "─".repeat(90))?;
        for entry in &self.authorities {
            writeln!(
                writer,
                "{:<12}  {:<32}  {:<23}  {:>6}  {:<7}",
                entry.view.kind.to_string(),
                truncate(&entry.view.common_name, 32),
                timestamp(entry.view.not_after),
                entry.remaining_days,
                if entry.issuing { "yes" } else { "" }
            )?;
        }
        Ok(())
    }
}

impl TableDisplay for CaView {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "{} CA {}", self.kind, self.ca_id)?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Subject:      {}", self.common_name)?;
        writeln!(writer, "Issuer:       {}", self.issuer)?;
        writeln!(writer, "Serial:       {}", self.serial)?;
        writeln!(writer, "Not Before:   {}", timestamp(self.not_before))?;
        writeln!(writer, "Not After:    {}", timestamp(self.not_after))?;
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}
