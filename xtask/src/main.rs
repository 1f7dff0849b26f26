//! Helper crate for building and testing wimstub.

use core::fmt;

use cli::{parse_arguments, Action, Arch};

pub mod cli;

fn main() {
    match parse_arguments() {
        Action::Build { arch, release } => match build(arch, release) {
            Ok(()) => {}
            Err(error) => eprintln!("error while building wimstub: {error}"),
        },
        Action::Test => match test() {
            Ok(()) => {}
            Err(error) => eprintln!("error while testing wimstub: {error}"),
        },
    };
}

/// Builds the `wimstub` library for the given UEFI target.
///
/// # Errors
///
/// Returns a [`CargoError`] when cargo cannot be launched or fails.
pub fn build(arch: Arch, release: bool) -> Result<(), CargoError> {
    let mut cmd = std::process::Command::new("cargo");
    cmd.arg("build");
    cmd.args(["--package", "wimstub"]);

    cmd.args(["--target", arch.as_target_triple()]);
    if release {
        cmd.arg("--release");
    }

    let status = cmd.status()?;
    if !status.success() {
        return Err(CargoError::Unsuccessful {
            code: status.code(),
        });
    }

    Ok(())
}

/// Runs the host test suite for every workspace crate.
///
/// # Errors
///
/// Returns a [`CargoError`] when cargo cannot be launched or a test fails.
pub fn test() -> Result<(), CargoError> {
    let mut cmd = std::process::Command::new("cargo");
    cmd.arg("test");
    cmd.arg("--workspace");

    let status = cmd.status()?;
    if !status.success() {
        return Err(CargoError::Unsuccessful {
            code: status.code(),
        });
    }

    Ok(())
}

/// Various errors that can occur while running a cargo command.
#[derive(Debug)]
pub enum CargoError {
    /// An error occurred while launching the process.
    ProcessError(std::io::Error),
    /// The cargo command was unsuccessful.
    Unsuccessful {
        /// The exit code of the child process that was launched.
        code: Option<i32>,
    },
}

impl From<std::io::Error> for CargoError {
    fn from(value: std::io::Error) -> Self {
        Self::ProcessError(value)
    }
}

impl fmt::Display for CargoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProcessError(error) => writeln!(f, "error while launching cargo: {error}"),
            Self::Unsuccessful { code: Some(code) } => {
                writeln!(f, "cargo failed with exit status {code}")
            }
            Self::Unsuccessful { code: None } => f.write_str("cargo terminated by signal"),
        }
    }
}
