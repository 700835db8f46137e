//! Command-line arguments.

use clap::error::ErrorKind;
use clap::{ArgAction, Parser, ValueEnum};

use crate::jit::Protocol;

#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"))]
/// azurejit - request just-in-time network access to an Azure VM
pub struct CommandLineArgs {
    /// Name of the virtual machine
    #[arg(long, short = 'n', required_unless_present = "sign_out")]
    pub vm_name: Option<String>,

    /// Port to open (1-65535)
    #[arg(
        long,
        short = 'p',
        required_unless_present = "sign_out",
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub port: Option<u16>,

    /// Source address prefix allowed to connect (IP, CIDR or "*")
    #[arg(long, short = 'a')]
    pub address_prefix: Option<String>,

    /// Hours of access (1-24); prompted when a new rule is needed and this is omitted
    #[arg(long, short = 't', value_parser = clap::value_parser!(u32).range(1..=24))]
    pub time: Option<u32>,

    /// Only search this subscription (id or display name)
    #[arg(long)]
    pub subscription: Option<String>,

    /// Only match VMs in this resource group
    #[arg(long, short = 'g')]
    pub resource_group: Option<String>,

    /// Protocol for a newly created port rule
    #[arg(long, value_enum, default_value_t = RuleProtocol::Any)]
    pub protocol: RuleProtocol,

    /// Justification recorded with the access request
    #[arg(long)]
    pub justification: Option<String>,

    /// Delete cached credentials and exit
    #[arg(long, action = ArgAction::SetTrue, conflicts_with_all = ["vm_name", "port"])]
    pub sign_out: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum RuleProtocol {
    #[value(name = "*", alias = "any")]
    Any,
    #[value(name = "tcp", alias = "TCP")]
    Tcp,
    #[value(name = "udp", alias = "UDP")]
    Udp,
}

impl From<RuleProtocol> for Protocol {
    fn from(value: RuleProtocol) -> Self {
        match value {
            RuleProtocol::Any => Protocol::Any,
            RuleProtocol::Tcp => Protocol::Tcp,
            RuleProtocol::Udp => Protocol::Udp,
        }
    }
}

/// Whether a parse failure is a usage error rather than help or version output.
pub fn is_usage_error(err: &clap::Error) -> bool {
    !matches!(
        err.kind(),
        ErrorKind::DisplayHelp
            | ErrorKind::DisplayVersion
            | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
    )
}

/// One-line description of a usage error, without clap's `error:` prefix.
pub fn usage_warning(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let first_line = rendered.lines().next().unwrap_or_default();
    first_line
        .strip_prefix("error: ")
        .unwrap_or(first_line)
        .to_string()
}
