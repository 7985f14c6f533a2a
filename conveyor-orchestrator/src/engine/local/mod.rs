//! Local collaborator implementations
//!
//! In-process stand-ins for a source host, a build service, an identity
//! service and a stack deployment service.

pub mod changeset;
pub mod credentials;
pub mod runner;
pub mod source;

pub use changeset::LocalChangeSetEngine;
pub use credentials::LocalCredentialIssuer;
pub use runner::ShellCommandRunner;
pub use source::DirectorySource;
