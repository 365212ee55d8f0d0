//! Credential resolution.
//!
//! Sources are tried in order: credentials inline in the identifier,
//! then the external credential cache, then the interactive prompt.
//! Freshly prompted credentials are only offered back to the cache
//! after the connection actually succeeds, and only when the user asked
//! for them to be remembered.

use crate::error::{Result, WorkerError};
use crate::target::Target;

/// Prompt hint when no previous attempt was rejected.
pub const MSG_ENTER: &str = "Please enter the username and password for the AFP server";

/// Prompt hint after the server rejected the previous credentials.
pub const MSG_RETRY: &str = "Authentication failed, please try again";

/// External credential cache, keyed by server and optional port.
pub trait CredentialStore {
    fn lookup(&mut self, server: &str, port: Option<u16>) -> Option<(String, String)>;

    /// Persist credentials after a successful connect. Invoked only for
    /// prompted credentials the user asked to remember.
    fn persist(&mut self, server: &str, port: Option<u16>, username: &str, password: &str);
}

/// Reply from the interactive prompt.
#[derive(Debug, Clone)]
pub struct PromptReply {
    pub username: String,
    pub password: String,
    /// User ticked "remember this password".
    pub remember: bool,
}

/// External interactive prompt. Returns `None` when the user cancels.
pub trait CredentialPrompt {
    fn prompt(&mut self, server: &str, username: &str, message: &str) -> Option<PromptReply>;
}

/// Where the credentials in a populated [`Target`] came from. Drives the
/// deferred-persist step after a successful connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedFrom {
    Inline,
    Store,
    Prompt { remember: bool },
}

/// Populate missing credentials on `target`, or fail with
/// [`WorkerError::Cancelled`].
///
/// With `auth_rejected` set, cached sources are skipped and the prompt
/// is shown with a "try again" hint, pre-filled with the best known
/// username.
pub fn resolve<S: CredentialStore, P: CredentialPrompt>(
    target: &mut Target,
    store: &mut S,
    prompt: &mut P,
    auth_rejected: bool,
) -> Result<ResolvedFrom> {
    if !auth_rejected {
        if target.username.is_some() && target.password.is_some() {
            return Ok(ResolvedFrom::Inline);
        }
        if let Some((user, pass)) = store.lookup(&target.server, target.port) {
            // An inline username wins over the cached one; the cached
            // password is only usable when the usernames agree.
            match &target.username {
                Some(inline) if *inline != user => {}
                _ => {
                    target.username = Some(user);
                    target.password = Some(pass);
                    return Ok(ResolvedFrom::Store);
                }
            }
        }
    }

    let message = if auth_rejected { MSG_RETRY } else { MSG_ENTER };
    let prefill = target.username.clone().unwrap_or_default();
    tracing::debug!(server = %target.server, auth_rejected, "prompting for credentials");
    match prompt.prompt(&target.server, &prefill, message) {
        Some(reply) => {
            target.username = Some(reply.username);
            target.password = Some(reply.password);
            Ok(ResolvedFrom::Prompt {
                remember: reply.remember,
            })
        }
        None => Err(WorkerError::Cancelled),
    }
}
