//! CA hierarchy commands: init, show, and new intermediates.

use std::io::Write;

use chrono::Utc;

use certd_pki::validation::remaining_validity;
use certd_pki::{CaManager, CaView, IntermediateRequest, PkiConfig, parse_ttl};

use crate::error::CliError;
use crate::output::{CaEntry, CaList, Message, OutputFormat};
use crate::state::StateDir;

/// CA command executor.
pub struct CaCommand<'a> {
    state: &'a StateDir,
    config: &'a PkiConfig,
}

impl<'a> CaCommand<'a> {
    /// Create a new CA command.
    #[must_use]
    pub const fn new(state: &'a StateDir, config: &'a PkiConfig) -> Self {
        Self { state, config }
    }

    /// Create the root CA and, if configured, an intermediate.
    ///
    /// # Errors
    ///
    /// Returns an error if the state is already initialized and `force` is
    /// not set, or if bootstrap fails.
    pub fn init<W: Write>(&self, writer: &mut W, format: &OutputFormat, force: bool) -> Result<(), CliError> {
        let identities = self.state.initialize(self.config, force)?;
        let msg = Message::success(format!(
            "Initialized {} certificate authorities under {}",
            identities.len(),
            self.config.ca_common_name
        ));
        format.write(writer, &msg)
    }

    /// Show the CA hierarchy.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded.
    pub fn show<W: Write>(&self, writer: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let cas = self.state.load_authorities()?;
        format.write(writer, &hierarchy(&cas))
    }

    /// Issue a new intermediate under the root and persist it.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid TTL, or if issuance or persistence
    /// fails.
    pub fn intermediate<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        common_name: &str,
        ttl: Option<&str>,
    ) -> Result<(), CliError> {
        let validity = match ttl {
            Some(ttl) => parse_ttl(ttl)?,
            None => self.config.ca_validity,
        };
        let cas = self.state.load_authorities()?;
        let mut request = IntermediateRequest::new(common_name, validity);
        request.organization.clone_from(&self.config.ca_organization);
        request.path_length = self.config.intermediate_path_length;

        let identity = cas.issue_intermediate(&request)?;
        let path = self.state.save_identity(&identity)?;
        let msg = Message::success(format!(
            "Intermediate '{common_name}' issued and saved to {}",
            path.display()
        ));
        format.write(writer, &msg)
    }
}

fn hierarchy(cas: &CaManager) -> CaList {
    let now = Utc::now();
    let issuing = cas.issuing_ca().id();
    let authorities = cas
        .authorities()
        .iter()
        .map(|ca| CaEntry {
            view: CaView::of(ca),
            remaining_days: remaining_validity(ca.certificate(), now).map_or(0, |d| d.num_days()),
            issuing: ca.id() == issuing,
        })
        .collect();
    CaList { authorities }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Format;

    fn run_show(state: &StateDir, config: &PkiConfig, format: Format) -> String {
        let mut buf = Vec::new();
        CaCommand::new(state, config)
            .show(&mut buf, &OutputFormat::new(format))
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn init_and_show() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path());
        let config = PkiConfig::new().with_ca_common_name("Plant Root");
        let format = OutputFormat::new(Format::Table);

        let mut buf = Vec::new();
        CaCommand::new(&state, &config)
            .init(&mut buf, &format, false)
            .unwrap();
        assert!(String::from_utf8(buf).unwrap().contains("Initialized 2"));

        let out = run_show(&state, &config, Format::Table);
        assert!(out.contains("Plant Root"));
        assert!(out.contains("intermediate"));
        assert!(out.contains("yes"));
    }

    #[test]
    fn intermediate_is_persisted_and_issuing() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path());
        let config = PkiConfig::new();
        let format = OutputFormat::new(Format::Table);
        let cmd = CaCommand::new(&state, &config);
        cmd.init(&mut Vec::new(), &format, false).unwrap();

        let mut buf = Vec::new();
        cmd.intermediate(&mut buf, &format, "Rotated Intermediate", Some("720h"))
            .unwrap();
        assert!(String::from_utf8(buf).unwrap().contains("intermediate-002"));

        let cas = state.load_authorities().unwrap();
        let list = hierarchy(&cas);
        assert_eq!(list.authorities.len(), 3);
        let issuing: Vec<_> = list.authorities.iter().filter(|e| e.issuing).collect();
        assert_eq!(issuing.len(), 1);
        assert_eq!(issuing[0].view.common_name, "Rotated Intermediate");
        assert!(issuing[0].remaining_days >= 29);
    }

    #[test]
    fn intermediate_rejects_bad_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path());
        let config = PkiConfig::new();
        let err = CaCommand::new(&state, &config)
            .intermediate(&mut Vec::new(), &OutputFormat::default(), "X", Some("soon"))
            .unwrap_err();
        assert!(matches!(err, CliError::Engine(certd_pki::Error::InvalidTtl { .. })));
    }

    #[test]
    fn show_json_includes_remaining_days() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path());
        let config = PkiConfig::new();
        state.initialize(&config, false).unwrap();
        let out = run_show(&state, &config, Format::Json);
        assert!(out.contains("\"remaining_days\""));
        assert!(out.contains("\"kind\": \"root\""));
    }
}
