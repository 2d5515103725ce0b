//! # otto
//!
//! Async session engine for storage-appliance test automation.
//!
//! otto drives the interactive text consoles of lab equipment - SRX
//! storage shelves, PDUs, serial console servers - the way an operator
//! would: send a command, wait for its echo, wait for the prompt, and
//! cope with everything the console throws in between. Asynchronous
//! appliance messages (RAID rebuild progress, power-supply warnings) are
//! recognized and scrubbed out of responses, and destructive commands'
//! confirmation dialogs can be auto-answered in force mode.
//!
//! ## Features
//!
//! - Native SSH sessions via russh, plus spawned telnet/cec clients for
//!   equipment SSH can't reach
//! - Expect-style echo/prompt protocol with tail-searched pattern buffer
//! - Asynchronous appliance-message filtering
//! - Confirmation-dialog auto-answering (force mode)
//! - Bounded reconnect for reboot and power-cycle workflows
//! - APC, Eaton and Netbooter PDU control
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use otto::{Prompt, SessionBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), otto::Error> {
//!     let mut shelf = SessionBuilder::ssh("srx-7")
//!         .username("admin")
//!         .password("admin")
//!         .prompt(Prompt::pattern(r"SRX shelf \d+> "))
//!         .build()?;
//!
//!     shelf.connect().await?;
//!
//!     let status = shelf.run("sos").await?;
//!     println!("{status}");
//!
//!     shelf.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod background;
pub mod error;
pub mod pdu;
pub mod result;
pub mod session;
pub mod transport;

// Re-export main types for convenience
pub use background::BackgroundCommand;
pub use error::{CommandError, Error, Result, SessionError, TransportError, UsageError};
pub use pdu::{OutletStatus, Pdu, PduKind, PowerState};
pub use result::{ReturnCode, Verdict};
pub use session::{
    AsyncMessageFilter, DialogAction, DialogTable, Prompt, RunOptions, Session, SessionBuilder,
    SessionConfig,
};
pub use transport::{AuthMethod, ProcessConfig, SshConfig};
