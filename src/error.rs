use thiserror::Error;

/// Errors raised by the signing pipeline and its backends.
#[derive(Debug, Error)]
pub enum Error {
	#[error("configuration error: {0}")]
	Configuration(String),

	#[error("vault {name:?} not found, expected exactly 1 result, got: {count}")]
	VaultNotFound { name: String, count: usize },

	#[error("signer backend unavailable: {0}")]
	BackendUnavailable(String),

	#[error("signer backend broke its contract: {0}")]
	BackendProtocolViolation(String),

	#[error("signer request {request_id} finished with status {status}; details: {sub_status}")]
	SigningRejected {
		request_id: String,
		status: String,
		sub_status: String,
	},

	#[error("signer request {request_id} did not reach a terminal status within {waited_secs}s")]
	SigningTimeout { request_id: String, waited_secs: u64 },

	#[error("transaction {0} aborted by user")]
	UserAborted(&'static str),

	#[error("address derived from the signing key is different from the delegator address: {derived} != {expected}")]
	AddressMismatch { derived: String, expected: String },

	#[error("transaction {tx_id} failed, expected status: 0, got: {code}{}", log_suffix(.log))]
	BroadcastFailure {
		code: i64,
		tx_id: String,
		log: Option<String>,
	},

	#[error("chain rpc error: {0}")]
	ChainRpc(String),

	#[error("invalid input: {0}")]
	InvalidInput(String),

	#[error("encoding error: {0}")]
	Codec(String),
}

fn log_suffix(log: &Option<String>) -> String {
	log.as_deref().map(|l| format!(" ({l})")).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used for exit codes and propagation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	Configuration,
	Transport,
	Protocol,
	Rejected,
	Aborted,
	Verification,
	Broadcast,
	Input,
}

impl Error {
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Configuration(_) | Self::VaultNotFound { .. } => ErrorKind::Configuration,
			Self::BackendUnavailable(_) | Self::ChainRpc(_) | Self::SigningTimeout { .. } => {
				ErrorKind::Transport
			}
			Self::BackendProtocolViolation(_) => ErrorKind::Protocol,
			Self::SigningRejected { .. } => ErrorKind::Rejected,
			Self::UserAborted(_) => ErrorKind::Aborted,
			Self::AddressMismatch { .. } => ErrorKind::Verification,
			Self::BroadcastFailure { .. } => ErrorKind::Broadcast,
			Self::InvalidInput(_) | Self::Codec(_) => ErrorKind::Input,
		}
	}

	/// Process exit code for this error. A user abort is a normal exit
	/// path and gets its own code.
	pub fn exit_code(&self) -> i32 {
		match self.kind() {
			ErrorKind::Aborted => 2,
			_ => 1,
		}
	}
}

impl From<reqwest::Error> for Error {
	fn from(e: reqwest::Error) -> Self {
		Self::BackendUnavailable(e.to_string())
	}
}

/// Exit code for an arbitrary command error: the core error's code when
/// one is in the chain, otherwise 1.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
	err.chain()
		.find_map(|cause| cause.downcast_ref::<Error>())
		.map(Error::exit_code)
		.unwrap_or(1)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn user_abort_has_distinct_exit_code() {
		assert_eq!(Error::UserAborted("signing").exit_code(), 2);
		assert_eq!(Error::Configuration("x".into()).exit_code(), 1);
		assert_eq!(
			Error::BackendProtocolViolation("no signatures".into()).exit_code(),
			1
		);
	}

	#[test]
	fn exit_code_survives_anyhow_context() {
		let err = anyhow::Error::new(Error::UserAborted("broadcast")).context("near tx delegate");
		assert_eq!(exit_code_for(&err), 2);

		let plain = anyhow::anyhow!("something else");
		assert_eq!(exit_code_for(&plain), 1);
	}

	#[test]
	fn rejection_message_carries_sub_status() {
		let err = Error::SigningRejected {
			request_id: "abc".into(),
			status: "BLOCKED".into(),
			sub_status: "BLOCKED_BY_POLICY".into(),
		};
		assert!(err.to_string().contains("BLOCKED_BY_POLICY"));
		assert_eq!(err.kind(), ErrorKind::Rejected);
	}

	#[test]
	fn broadcast_failure_message() {
		let err = Error::BroadcastFailure {
			code: 5,
			tx_id: "ABCD".into(),
			log: Some("insufficient funds".into()),
		};
		assert_eq!(
			err.to_string(),
			"transaction ABCD failed, expected status: 0, got: 5 (insufficient funds)"
		);
	}
}
