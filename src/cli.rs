//! Command-line surface.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use xenctl_xapi::value::XmlRpcValue;

/// Manage XenServer / XCP-ng pools over XenAPI
#[derive(Debug, Parser)]
#[command(name = "xenctl", version, about = "Manage XenServer / XCP-ng pools over XenAPI")]
pub struct Cli {
    /// Pool master: host, host:port or URL
    #[arg(short, long, global = true, env = "XENCTL_SERVER")]
    pub server: Option<String>,

    /// XenAPI user
    #[arg(short, long, global = true, env = "XENCTL_USER", default_value = "root")]
    pub user: String,

    /// XenAPI password (prompted when absent)
    #[arg(long, global = true, env = "XENCTL_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Accept self-signed TLS certificates
    #[arg(long, global = true)]
    pub insecure: bool,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List guest VMs
    Vms,

    /// List VM templates
    Templates,

    /// List storage repositories
    Srs,

    /// List hosts with memory usage
    Hosts,

    /// List advertised namespaces, or the methods of one namespace
    Methods { namespace: Option<String> },

    /// Call any XenAPI method; the session is prepended automatically
    ///
    /// Arguments are strings unless prefixed with int:, i8:, bool: or double:.
    Call {
        /// Dotted method name, e.g. VM.get_all_records
        method: String,
        args: Vec<String>,
    },

    /// Create a VM from a template
    CreateVm {
        /// Name of the new VM
        name: String,
        /// Template name, uuid or reference
        #[arg(short, long)]
        template: String,
        /// Memory size, e.g. 2G or 512M
        #[arg(short, long)]
        memory: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        /// Start the VM once provisioned
        #[arg(long)]
        start: bool,
    },

    /// Destroy a VM and its disks
    DestroyVm {
        vm: String,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Start a VM
    Start { vm: String },

    /// Shut a VM down
    Shutdown {
        vm: String,
        /// Hard power-off instead of a clean shutdown
        #[arg(short, long)]
        force: bool,
    },

    /// Import an XVA file
    Import {
        file: PathBuf,
        /// Target SR name, uuid or reference (pool default otherwise)
        #[arg(long)]
        sr: Option<String>,
    },

    /// Export a VM to an XVA file
    Export { vm: String, file: PathBuf },

    /// Copy a VM to another pool without a local copy
    Transfer {
        vm: String,
        /// Destination pool master
        #[arg(long)]
        to: String,
        /// Destination user (defaults to --user)
        #[arg(long)]
        to_user: Option<String>,
        /// Destination password (prompted when absent)
        #[arg(long, env = "XENCTL_TO_PASSWORD", hide_env_values = true)]
        to_password: Option<String>,
        /// Destination SR name, uuid or reference
        #[arg(long)]
        sr: Option<String>,
    },

    /// Run a local shell script on a remote machine over SSH
    RunScript {
        /// Target host name or address
        host: String,
        script: PathBuf,
        #[arg(long, default_value = "root")]
        ssh_user: String,
        #[arg(long, default_value_t = 22)]
        port: u16,
        #[arg(long, env = "XENCTL_SSH_PASSWORD", hide_env_values = true)]
        ssh_password: Option<String>,
        /// Run the script through sudo
        #[arg(long)]
        sudo: bool,
    },
}

/// Parse one `call` argument. `int:5`, `i8:5`, `bool:true`, `double:1.5`;
/// anything else is sent as a string.
pub fn parse_arg(raw: &str) -> anyhow::Result<XmlRpcValue> {
    let value = if let Some(v) = raw.strip_prefix("int:") {
        XmlRpcValue::Int(v.trim().parse()?)
    } else if let Some(v) = raw.strip_prefix("i8:") {
        XmlRpcValue::Int64(v.trim().parse()?)
    } else if let Some(v) = raw.strip_prefix("bool:") {
        XmlRpcValue::Bool(match v.trim() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            other => anyhow::bail!("not a boolean: '{other}'"),
        })
    } else if let Some(v) = raw.strip_prefix("double:") {
        XmlRpcValue::Double(v.trim().parse()?)
    } else {
        XmlRpcValue::string(raw)
    };
    Ok(value)
}
