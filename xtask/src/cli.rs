//! Command line parsing and [`Action`] construction.

/// The action to carry out.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Action {
    /// Build the `wimstub` library for a UEFI target.
    Build {
        /// The architecture to build for.
        arch: Arch,
        /// Whether to build in release mode.
        release: bool,
    },
    /// Run the host test suite.
    Test,
}

/// The supported UEFI target architectures.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Arch {
    /// The x86_64 architecture.
    X86_64,
    /// The aarch64 architecture.
    Aarch64,
}

impl Arch {
    /// The rustc target triple for this architecture.
    pub fn as_target_triple(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64-unknown-uefi",
            Self::Aarch64 => "aarch64-unknown-uefi",
        }
    }

    /// The plain name of this architecture.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Aarch64 => "aarch64",
        }
    }
}

/// Parses arguments to construct an [`Action`].
pub fn parse_arguments() -> Action {
    let mut matches = command_parser().get_matches();
    let (subcommand_name, subcommand_matches) =
        matches.remove_subcommand().expect("subcommand required");
    match subcommand_name.as_str() {
        "build" => parse_build_arguments(subcommand_matches),
        "test" => Action::Test,
        name => unreachable!("unexpected subcommand {name:?}"),
    }
}

/// Parses subcommand arguments for the [`Action::Build`] subcommand.
pub fn parse_build_arguments(mut matches: clap::ArgMatches) -> Action {
    let arch = matches
        .remove_one::<Arch>("arch")
        .expect("arch has a default value");
    let release = matches.get_flag("release");

    Action::Build { arch, release }
}

/// Returns the clap command parser.
pub fn command_parser() -> clap::Command {
    let arch_arg = clap::Arg::new("arch")
        .help("The architecture to build wimstub for")
        .long("arch")
        .short('a')
        .value_parser(parse_arch)
        .value_name("ARCH")
        .default_value("x86_64");

    let release_arg = clap::Arg::new("release")
        .help("Build wimstub in release mode")
        .long("release")
        .short('r')
        .action(clap::ArgAction::SetTrue);

    let build_subcommand = clap::Command::new("build")
        .about("Builds the wimstub library for a UEFI target")
        .arg(arch_arg)
        .arg(release_arg);

    let test_subcommand = clap::Command::new("test").about("Runs the host test suite");

    clap::Command::new("xtask")
        .about("Utility for managing wimstub")
        .subcommand_required(true)
        .subcommand(build_subcommand)
        .subcommand(test_subcommand)
}

/// Parses an [`Arch`] from its plain name.
fn parse_arch(value: &str) -> Result<Arch, String> {
    match value {
        "x86_64" => Ok(Arch::X86_64),
        "aarch64" => Ok(Arch::Aarch64),
        other => Err(format!("unknown architecture {other:?}")),
    }
}
