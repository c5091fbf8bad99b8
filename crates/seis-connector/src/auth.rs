//! SeedLink AUTH credentials.
//!
//! A `CredentialProvider` hands out a `Secret` holding the AUTH value
//! (`USERPASS <user> <pass>` or `JWT <token>`). The secret lives in a
//! fixed-capacity buffer that is zeroed when released or dropped.

use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::sync::Mutex;

use arrayvec::ArrayVec;

use crate::error::AuthError;

pub const SECRET_CAPACITY: usize = 1024;

pub const ENV_USERNAME: &str = "SEEDLINK_USERNAME";
pub const ENV_PASSWORD: &str = "SEEDLINK_PASSWORD";

/// Bounded, self-zeroing AUTH value
pub struct Secret {
    buf: ArrayVec<u8, SECRET_CAPACITY>,
}

impl Secret {
    /// Join `parts` with single spaces
    pub fn from_parts(parts: &[&str]) -> Result<Self, AuthError> {
        let mut buf = ArrayVec::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                buf.try_push(b' ')
                    .map_err(|_| AuthError::TooLarge { capacity: SECRET_CAPACITY })?;
            }
            buf.try_extend_from_slice(part.as_bytes())
                .map_err(|_| AuthError::TooLarge { capacity: SECRET_CAPACITY })?;
        }
        Ok(Self { buf })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn scrub(&mut self) {
        self.buf.as_mut_slice().fill(0);
        std::hint::black_box(&self.buf);
        self.buf.clear();
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.scrub();
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({} bytes)", self.buf.len())
    }
}

/// Source of AUTH values for a SeedLink server
pub trait CredentialProvider: Send + Sync {
    fn obtain(&self, server: &str) -> Result<Secret, AuthError>;

    /// Called right after the AUTH command is written
    fn release(&self, secret: Secret) {
        drop(secret);
    }
}

/// USERPASS from environment variables
pub struct EnvCredentials {
    user_var: String,
    pass_var: String,
}

impl EnvCredentials {
    pub fn new(user_var: impl Into<String>, pass_var: impl Into<String>) -> Self {
        Self {
            user_var: user_var.into(),
            pass_var: pass_var.into(),
        }
    }

    /// True when both variables are set
    pub fn available(&self) -> bool {
        std::env::var_os(&self.user_var).is_some() && std::env::var_os(&self.pass_var).is_some()
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new(ENV_USERNAME, ENV_PASSWORD)
    }
}

impl CredentialProvider for EnvCredentials {
    fn obtain(&self, _server: &str) -> Result<Secret, AuthError> {
        let user = std::env::var(&self.user_var)
            .map_err(|_| AuthError::Unavailable(format!("{} not set", self.user_var)))?;
        let pass = std::env::var(&self.pass_var)
            .map_err(|_| AuthError::Unavailable(format!("{} not set", self.pass_var)))?;
        let secret = Secret::from_parts(&["USERPASS", &user, &pass]);
        scrub_string(user);
        scrub_string(pass);
        secret
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    UserPass,
    Token,
}

/// Interactive prompt for user/password or a token
pub struct PromptCredentials {
    mode: PromptMode,
    input: Mutex<Box<dyn BufRead + Send>>,
    output: Mutex<Box<dyn Write + Send>>,
}

impl PromptCredentials {
    pub fn new(
        mode: PromptMode,
        input: Box<dyn BufRead + Send>,
        output: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            mode,
            input: Mutex::new(input),
            output: Mutex::new(output),
        }
    }

    /// Prompt on stderr, read from stdin
    pub fn terminal(mode: PromptMode) -> Self {
        Self::new(
            mode,
            Box::new(BufReader::new(std::io::stdin())),
            Box::new(std::io::stderr()),
        )
    }

    fn ask(&self, prompt: &str) -> Result<String, AuthError> {
        {
            let mut out = self.output.lock().unwrap_or_else(|p| p.into_inner());
            out.write_all(prompt.as_bytes())?;
            out.flush()?;
        }
        let mut line = String::new();
        let read = self
            .input
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .read_line(&mut line)?;
        if read == 0 {
            return Err(AuthError::Unavailable("no input".to_string()));
        }
        let trimmed = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed);
        Ok(line)
    }
}

impl CredentialProvider for PromptCredentials {
    fn obtain(&self, server: &str) -> Result<Secret, AuthError> {
        match self.mode {
            PromptMode::UserPass => {
                let user = self.ask(&format!("Enter username for [{}]: ", server))?;
                let pass = self.ask("Enter password: ")?;
                let secret = Secret::from_parts(&["USERPASS", &user, &pass]);
                scrub_string(user);
                scrub_string(pass);
                secret
            }
            PromptMode::Token => {
                let token = self.ask(&format!("Enter token for [{}]: ", server))?;
                let secret = Secret::from_parts(&["JWT", &token]);
                scrub_string(token);
                secret
            }
        }
    }
}

fn scrub_string(s: String) {
    let mut bytes = s.into_bytes();
    bytes.fill(0);
    std::hint::black_box(&bytes);
}
