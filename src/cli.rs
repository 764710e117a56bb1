/// Command-line interface: argument definitions and command execution
use crate::{
    config::{LogFormat, ResponderConfig},
    context::AppContext,
    error::{ResponderError, ResponderResult},
    identity,
    lifecycle::{self, LifecycleController},
    store::{self, format_serial, parse_serial, RevocationReason},
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

/// OCSP responder for the certificates of a single CA
#[derive(Parser, Debug)]
#[command(name = "ocsp-responder")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Log output format: pretty or json
    #[arg(long, global = true, env = "OCSP_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    /// PID file tracking the running responder
    #[arg(long, global = true)]
    pub pid_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the OCSP responder and block until SIGINT/SIGTERM
    Start(StartArgs),

    /// Stop the running OCSP responder
    Stop,

    /// Revoke a certificate by serial number
    Revoke(RevokeArgs),

    /// Record an issued certificate so the responder reports it as good
    Register(RegisterArgs),

    /// Print a certificate's serial number in hex
    Serial(SerialArgs),
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Listen address, e.g. 0.0.0.0:1443
    #[arg(long)]
    pub listen: Option<String>,

    /// CA certificate (PEM)
    #[arg(long)]
    pub cacert: Option<PathBuf>,

    /// OCSP signing certificate (PEM)
    #[arg(long)]
    pub ocspcert: Option<PathBuf>,

    /// OCSP signing key (PEM, PKCS#1 or PKCS#8)
    #[arg(long)]
    pub ocspkey: Option<PathBuf>,

    /// Revocation store connection string (sqlite: or postgres://)
    #[arg(long)]
    pub dburl: Option<String>,

    /// Serve plain HTTP (TLS terminated elsewhere)
    #[arg(long)]
    pub no_tls: bool,
}

#[derive(Args, Debug)]
pub struct RevokeArgs {
    /// Serial number in hex
    #[arg(long)]
    pub serial: String,

    /// CRLReason code (0-10, 7 is not allowed)
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub reason: i64,

    /// Free text stored with the revocation
    #[arg(long, default_value = "")]
    pub info: String,

    /// Revocation store connection string
    #[arg(long)]
    pub dburl: Option<String>,
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// Issued certificate (PEM)
    #[arg(long)]
    pub cert: PathBuf,

    /// Description stored with the certificate (defaults to its subject)
    #[arg(long)]
    pub description: Option<String>,

    /// Revocation store connection string
    #[arg(long)]
    pub dburl: Option<String>,
}

#[derive(Args, Debug)]
pub struct SerialArgs {
    /// Certificate (PEM)
    #[arg(long)]
    pub cert: PathBuf,
}

impl StartArgs {
    /// Flags take precedence over the environment
    pub fn apply(&self, config: &mut ResponderConfig) {
        if let Some(listen) = &self.listen {
            config.service.listen_address = listen.clone();
        }
        if let Some(path) = &self.cacert {
            config.identity.ca_cert = path.clone();
        }
        if let Some(path) = &self.ocspcert {
            config.identity.ocsp_cert = path.clone();
        }
        if let Some(path) = &self.ocspkey {
            config.identity.ocsp_key = path.clone();
        }
        if let Some(url) = &self.dburl {
            config.storage.database_url = url.clone();
        }
        if self.no_tls {
            config.service.tls_enabled = false;
        }
    }
}

/// Execute the parsed command
pub async fn run(cli: Cli) -> ResponderResult<()> {
    let mut config = ResponderConfig::from_env()?;
    if let Some(pid_file) = &cli.pid_file {
        config.service.pid_file = pid_file.clone();
    }
    let controller = LifecycleController::new(config.service.pid_file.clone());

    match cli.command {
        Commands::Start(args) => {
            args.apply(&mut config);
            info!("... starting OCSP responder");
            let ctx = AppContext::new(config).await?;
            lifecycle::run_daemon(ctx, &controller).await?;
            info!("Done! OCSP responder stopped");
        }
        Commands::Stop => {
            info!("... stopping OCSP responder");
            let pid = controller.stop()?;
            info!(pid, "Done! OCSP responder has been asked to stop");
        }
        Commands::Revoke(args) => {
            let serial = parse_serial(&args.serial)?;
            let reason = RevocationReason::from_code(args.reason)?;
            let store = store::connect(&database_url(args.dburl, &config.storage.database_url)?).await?;

            let revocation = store.record_revocation(serial, reason, &args.info).await?;
            info!(
                serial = %format_serial(serial),
                reason = reason.as_str(),
                revoked_at = %revocation.revoked_at,
                "Done! Certificate has been revoked"
            );
        }
        Commands::Register(args) => {
            let cert = identity::read_certificate(&args.cert)?;
            let serial = identity::certificate_serial(&cert)?;
            let expiry = identity::certificate_expiry(&cert)?;
            let description = args
                .description
                .unwrap_or_else(|| cert.tbs_certificate.subject.to_string());

            let store = store::connect(&database_url(args.dburl, &config.storage.database_url)?).await?;
            store.record_issued(serial, expiry, &description).await?;
            info!(serial = %format_serial(serial), %expiry, "Done! Certificate registered");
        }
        Commands::Serial(args) => {
            let cert = identity::read_certificate(&args.cert)?;
            println!("{}", identity::certificate_serial_hex(&cert));
        }
    }

    Ok(())
}

fn database_url(flag: Option<String>, configured: &str) -> ResponderResult<String> {
    match flag {
        Some(url) => Ok(url),
        None if !configured.is_empty() => Ok(configured.to_string()),
        None => Err(ResponderError::Config(
            "DATABASE_URL (or --dburl) is required".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_flags() {
        let cli = Cli::try_parse_from([
            "ocsp-responder",
            "start",
            "--listen",
            "127.0.0.1:8443",
            "--dburl",
            "sqlite://ocsp.sqlite",
            "--no-tls",
        ])
        .unwrap();

        match cli.command {
            Commands::Start(args) => {
                assert_eq!(args.listen.as_deref(), Some("127.0.0.1:8443"));
                assert_eq!(args.dburl.as_deref(), Some("sqlite://ocsp.sqlite"));
                assert!(args.no_tls);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_revoke_defaults() {
        let cli = Cli::try_parse_from(["ocsp-responder", "revoke", "--serial", "1002"]).unwrap();
        match cli.command {
            Commands::Revoke(args) => {
                assert_eq!(args.serial, "1002");
                assert_eq!(args.reason, 0);
                assert_eq!(args.info, "");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_negative_reason_reaches_validation() {
        let cli = Cli::try_parse_from([
            "ocsp-responder",
            "revoke",
            "--serial",
            "1002",
            "--reason",
            "-1",
        ])
        .unwrap();
        match cli.command {
            Commands::Revoke(args) => {
                assert!(RevocationReason::from_code(args.reason).is_err())
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_database_url_precedence() {
        assert_eq!(
            database_url(Some("sqlite://flag.sqlite".to_string()), "sqlite://env.sqlite").unwrap(),
            "sqlite://flag.sqlite"
        );
        assert_eq!(
            database_url(None, "sqlite://env.sqlite").unwrap(),
            "sqlite://env.sqlite"
        );
        assert!(database_url(None, "").is_err());
    }
}
