//! coreos-cloudinit - first-boot provisioning agent
//!
//! Reads user-data and metadata from one of several datasources and applies
//! the resulting cloud-config to the host.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use coreos_cloudinit::CloudInitError;
use coreos_cloudinit::config::merge::{merge, merge_all_configs};
use coreos_cloudinit::config::validate::validate;
use coreos_cloudinit::datasources::cloudsigma::CloudSigma;
use coreos_cloudinit::datasources::configdrive::ConfigDrive;
use coreos_cloudinit::datasources::digitalocean::DigitalOcean;
use coreos_cloudinit::datasources::ec2::Ec2;
use coreos_cloudinit::datasources::file::LocalFile;
use coreos_cloudinit::datasources::proc_cmdline::ProcCmdline;
use coreos_cloudinit::datasources::url::RemoteFile;
use coreos_cloudinit::datasources::vmware::Vmware;
use coreos_cloudinit::datasources::waagent::{self, Waagent};
use coreos_cloudinit::datasources::{Datasource, select_datasource};
use coreos_cloudinit::fetch::{Fetcher, HttpClient};
use coreos_cloudinit::initialize::env::{DEFAULT_SSH_KEY_NAME, DEFAULT_WORKSPACE};
use coreos_cloudinit::initialize::workspace::persist_user_data;
use coreos_cloudinit::initialize::{Environment, Provisioner};
use coreos_cloudinit::network::NetconfType;
use coreos_cloudinit::system::{HostSystem, SystemctlBus};
use coreos_cloudinit::userdata::parse_userdata;

const EXIT_FLAGS: u8 = 1;
const EXIT_PARSE: u8 = 2;
const EXIT_APPLY: u8 = 3;

#[derive(Parser, Debug)]
#[command(name = "coreos-cloudinit")]
#[command(author, version, about = "First-boot provisioning from cloud-config user-data", long_about = None)]
struct Cli {
    /// Read user-data from a local file
    #[arg(long, value_name = "PATH")]
    from_file: Option<PathBuf>,

    /// Download user-data from a URL
    #[arg(long, value_name = "URL")]
    from_url: Option<String>,

    /// Read data from an OpenStack-style config drive mounted at this path
    #[arg(long, value_name = "PATH")]
    from_configdrive: Option<PathBuf>,

    /// Poll the EC2-compatible metadata service
    #[arg(long, alias = "from-metadata-service", value_name = "URL", num_args = 0..=1,
          default_missing_value = coreos_cloudinit::datasources::ec2::DEFAULT_ROOT)]
    from_ec2_metadata: Option<String>,

    /// Poll the DigitalOcean metadata service
    #[arg(long, value_name = "URL", num_args = 0..=1,
          default_missing_value = coreos_cloudinit::datasources::digitalocean::DEFAULT_ROOT)]
    from_digitalocean_metadata: Option<String>,

    /// Read data from the Azure agent's directory
    #[arg(long, value_name = "PATH", num_args = 0..=1,
          default_missing_value = waagent::DEFAULT_ROOT)]
    from_waagent: Option<PathBuf>,

    /// Read data from VMware guestinfo variables
    #[arg(long)]
    from_vmware_guestinfo: bool,

    /// Read the CloudSigma server context
    #[arg(long)]
    from_cloudsigma_metadata: bool,

    /// Fetch user-data from the cloud-config-url on the kernel command line
    #[arg(long)]
    from_proc_cmdline: bool,

    /// Preset datasource flags for an OEM
    #[arg(long, value_parser = ["ec2-compat", "digitalocean", "azure", "cloudsigma", "vmware"])]
    oem: Option<String>,

    /// Directory for the agent's own files
    #[arg(long, env = "COREOS_CLOUDINIT_WORKSPACE", default_value = DEFAULT_WORKSPACE)]
    workspace: PathBuf,

    /// Name under which SSH keys are authorized
    #[arg(long, env = "COREOS_CLOUDINIT_SSH_KEY_NAME", default_value = DEFAULT_SSH_KEY_NAME)]
    ssh_key_name: String,

    /// Convert the datasource's network config (debian, digitalocean, vmware)
    #[arg(long, value_name = "TYPE")]
    convert_netconf: Option<NetconfType>,

    /// Validate the user-data and print the report instead of applying it
    #[arg(long)]
    validate: bool,

    /// Exit successfully even when applying the config fails
    #[arg(long)]
    ignore_failure: bool,

    /// Seconds to wait for a datasource to become available
    #[arg(long, default_value_t = 300)]
    timeout: u64,

    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Fill in the flags an OEM preset implies
    fn apply_oem(&mut self) {
        match self.oem.as_deref() {
            Some("ec2-compat") => {
                self.from_ec2_metadata
                    .get_or_insert_with(|| coreos_cloudinit::datasources::ec2::DEFAULT_ROOT.to_string());
                self.from_configdrive.get_or_insert_with(|| "/media/configdrive".into());
            }
            Some("digitalocean") => {
                self.from_digitalocean_metadata.get_or_insert_with(|| {
                    coreos_cloudinit::datasources::digitalocean::DEFAULT_ROOT.to_string()
                });
                self.convert_netconf.get_or_insert(NetconfType::DigitalOcean);
            }
            Some("azure") => {
                self.from_waagent.get_or_insert_with(|| waagent::DEFAULT_ROOT.into());
            }
            Some("cloudsigma") => self.from_cloudsigma_metadata = true,
            Some("vmware") => {
                self.from_vmware_guestinfo = true;
                self.convert_netconf.get_or_insert(NetconfType::Vmware);
            }
            _ => {}
        }
    }

    /// Datasources in the order they are polled
    fn datasources(&self, fetcher: &Arc<dyn Fetcher>) -> Vec<Box<dyn Datasource>> {
        let mut sources: Vec<Box<dyn Datasource>> = Vec::new();
        if let Some(path) = &self.from_file {
            sources.push(Box::new(LocalFile::new(path)));
        }
        if let Some(url) = &self.from_url {
            sources.push(Box::new(RemoteFile::new(url, fetcher.clone())));
        }
        if let Some(root) = &self.from_configdrive {
            sources.push(Box::new(ConfigDrive::new(root)));
        }
        if let Some(root) = &self.from_ec2_metadata {
            sources.push(Box::new(Ec2::with_root(root, fetcher.clone())));
        }
        if let Some(root) = &self.from_digitalocean_metadata {
            sources.push(Box::new(DigitalOcean::with_root(root, fetcher.clone())));
        }
        if let Some(root) = &self.from_waagent {
            sources.push(Box::new(Waagent::new(root)));
        }
        if self.from_vmware_guestinfo {
            sources.push(Box::new(Vmware::new()));
        }
        if self.from_cloudsigma_metadata {
            sources.push(Box::new(CloudSigma::new()));
        }
        if self.from_proc_cmdline {
            sources.push(Box::new(ProcCmdline::new(fetcher.clone())));
        }
        sources
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

/// A failed phase and the exit code it maps to
struct Failure {
    phase: &'static str,
    code: u8,
    error: CloudInitError,
}

impl Failure {
    fn new(phase: &'static str, code: u8) -> impl FnOnce(CloudInitError) -> Self {
        move |error| Self { phase, code, error }
    }
}

async fn run(cli: &Cli) -> Result<(), Failure> {
    let fetcher: Arc<dyn Fetcher> =
        Arc::new(HttpClient::new().map_err(Failure::new("creating HTTP client", EXIT_FLAGS))?);

    let sources = cli.datasources(&fetcher);
    if sources.is_empty() {
        return Err(Failure::new("selecting datasource", EXIT_FLAGS)(
            CloudInitError::config("Provide at least one datasource flag"),
        ));
    }
    let source = select_datasource(sources, Duration::from_secs(cli.timeout))
        .await
        .map_err(Failure::new("selecting datasource", EXIT_FLAGS))?;

    let userdata = source
        .fetch_userdata()
        .await
        .map_err(Failure::new("fetching user-data", EXIT_FLAGS))?;

    if cli.validate {
        let report = validate(&userdata);
        print!("{report}");
        if report.has_errors() {
            return Err(Failure::new("validating user-data", EXIT_PARSE)(
                CloudInitError::Validation(format!(
                    "{} problem(s) found",
                    report.entries().len()
                )),
            ));
        }
        return Ok(());
    }

    let metadata = source
        .fetch_metadata()
        .await
        .map_err(Failure::new("fetching metadata", EXIT_FLAGS))?;

    let env = Environment::new("/", &cli.workspace)
        .with_config_root(source.config_root())
        .with_ssh_key_name(&cli.ssh_key_name)
        .with_substitutions(metadata.substitutions())
        .with_netconf(cli.convert_netconf);

    if !userdata.is_empty() {
        persist_user_data(&env, &userdata)
            .await
            .map_err(Failure::new("persisting user-data", EXIT_APPLY))?;
    }

    let parsed = parse_userdata(&userdata, fetcher.as_ref())
        .await
        .map_err(Failure::new("parsing user-data", EXIT_PARSE))?;
    let (configs, scripts) = parsed.into_parts();
    let config = merge_all_configs(&configs).map_err(Failure::new("merging user-data", EXIT_PARSE))?;
    let config = merge(&metadata, config);

    info!(
        "Applying cloud-config with {} script(s) from {}",
        scripts.len(),
        source.name()
    );
    let system = HostSystem;
    let bus = SystemctlBus;
    Provisioner::new(&env, &system, &bus, fetcher.as_ref())
        .apply(&config, &scripts)
        .await
        .map_err(Failure::new("applying config", EXIT_APPLY))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let mut cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                clap::error::ErrorKind::DisplayVersion => 0,
                _ => EXIT_FLAGS,
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };
    init_logging(cli.verbose);
    cli.apply_oem();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            error!("Failed {}: {}", failure.phase, failure.error);
            if cli.ignore_failure && failure.code == EXIT_APPLY {
                warn!("Ignoring failure");
                return ExitCode::SUCCESS;
            }
            ExitCode::from(failure.code)
        }
    }
}
