use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::journal::{self, AuditSink, JournalEntry};
use crate::prompt::Confirm;
use crate::signer::{PublicKeyMaterial, SignatureMaterial, Signer, Vault};

/// Where a single signing operation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
	Built,
	Digested,
	AwaitingSignature,
	Signed,
	Verified,
	Broadcast,
	NotBroadcast,
	Aborted,
	Failed,
}

impl Stage {
	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Broadcast | Self::NotBroadcast | Self::Aborted | Self::Failed)
	}

	/// Legal transitions. Operations run strictly in order; abort is only
	/// possible while waiting on the operator, failure only once a
	/// signature has been requested.
	pub fn can_advance(self, next: Stage) -> bool {
		use Stage::*;
		matches!(
			(self, next),
			(Built, Digested)
				| (Digested, AwaitingSignature)
				| (AwaitingSignature, Signed)
				| (AwaitingSignature, Aborted)
				| (AwaitingSignature, Failed)
				| (Signed, Verified)
				| (Signed, Failed)
				| (Verified, Broadcast)
				| (Verified, NotBroadcast)
				| (Verified, Failed)
		)
	}
}

impl fmt::Display for Stage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

/// Vault, key and addresses resolved once at pipeline init.
#[derive(Debug, Clone)]
pub struct SigningAccount {
	pub vault: Vault,
	pub public_key: PublicKeyMaterial,
	pub asset_id: String,
	pub delegator: String,
}

impl SigningAccount {
	pub async fn resolve(
		signer: &Signer,
		vault_name: &str,
		asset_id: &str,
		delegator: &str,
	) -> Result<Self> {
		let vault = signer.get_vault(vault_name).await?;
		let public_key = signer.public_key(&vault, asset_id).await?;
		tracing::info!(
			target: "pipeline",
			vault = %vault.name,
			public_key = %hex::encode(&public_key.public_key),
			"signing key resolved"
		);
		Ok(Self {
			vault,
			public_key,
			asset_id: asset_id.to_owned(),
			delegator: delegator.to_owned(),
		})
	}

	/// Fail with an address mismatch unless `derived` is the delegator.
	pub fn expect_delegator(&self, derived: &str) -> Result<()> {
		if derived != self.delegator {
			return Err(Error::AddressMismatch {
				derived: derived.to_owned(),
				expected: self.delegator.clone(),
			});
		}
		Ok(())
	}
}

/// What gets sent to the signer: the hex message and an operator note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignPayload {
	pub message: Vec<u8>,
	pub note: String,
}

/// Chain's answer to a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReceipt {
	/// Zero on success.
	pub code: i64,
	pub tx_id: String,
	pub gas_used: Option<u64>,
	pub gas_wanted: Option<u64>,
	pub log: Option<String>,
}

impl BroadcastReceipt {
	pub fn accepted(tx_id: impl Into<String>) -> Self {
		Self {
			code: 0,
			tx_id: tx_id.into(),
			gas_used: None,
			gas_wanted: None,
			log: None,
		}
	}
}

/// Per-chain half of the signing flow. Implementations build and encode;
/// the shared [`Flow`] drives confirmation, signing, journaling and
/// broadcast so every chain funnels through the same coordinator.
#[async_trait::async_trait]
pub trait ChainPipeline: Send + Sync {
	type Unsigned: Serialize + Send + Sync;
	type Signed: Send + Sync;

	fn account(&self) -> &SigningAccount;

	/// Exact bytes the signer must sign, plus the note shown to approvers.
	fn digest(&self, unsigned: &Self::Unsigned) -> Result<SignPayload>;

	/// Attach the signature in the chain's native envelope.
	fn assemble(&self, unsigned: Self::Unsigned, signature: &SignatureMaterial)
		-> Result<Self::Signed>;

	/// Re-derive the signer address from the signed transaction and check
	/// it against the delegator.
	fn verify(&self, signed: &Self::Signed) -> Result<()>;

	/// JSON view of the signed transaction for display and the journal.
	fn describe(&self, signed: &Self::Signed) -> Value;

	async fn broadcast(&self, signed: &Self::Signed) -> Result<BroadcastReceipt>;

	/// Where the operator can follow the transaction after broadcast.
	fn explorer_link(&self, _signed: &Self::Signed, _receipt: &BroadcastReceipt) -> Option<String> {
		None
	}
}

/// Drives one transaction through the stages. One flow per invocation.
pub struct Flow<'a> {
	signer: &'a Signer,
	journal: &'a dyn AuditSink,
	confirm: &'a dyn Confirm,
	stage: Stage,
	history: Vec<Stage>,
}

impl<'a> Flow<'a> {
	pub fn new(signer: &'a Signer, journal: &'a dyn AuditSink, confirm: &'a dyn Confirm) -> Self {
		Self {
			signer,
			journal,
			confirm,
			stage: Stage::Built,
			history: vec![Stage::Built],
		}
	}

	pub fn stage(&self) -> Stage {
		self.stage
	}

	/// Every stage visited so far, in order.
	pub fn history(&self) -> &[Stage] {
		&self.history
	}

	fn advance(&mut self, next: Stage) {
		debug_assert!(
			self.stage.can_advance(next),
			"illegal transition {} -> {next}",
			self.stage
		);
		tracing::debug!(target: "pipeline", from = %self.stage, to = %next, "stage transition");
		self.stage = next;
		self.history.push(next);
	}

	fn fail(&mut self, err: Error) -> Error {
		tracing::warn!(target: "pipeline", stage = %self.stage, error = %err, "signing flow failed");
		self.advance(Stage::Failed);
		err
	}

	/// Digest, confirm, sign, assemble and verify `unsigned`.
	pub async fn sign<P: ChainPipeline>(
		&mut self,
		pipeline: &P,
		unsigned: P::Unsigned,
	) -> Result<P::Signed> {
		let unsigned_view = serde_json::to_value(&unsigned).map_err(|e| Error::Codec(e.to_string()))?;
		let payload = pipeline.digest(&unsigned)?;
		self.advance(Stage::Digested);

		step(1, 3, "prepare unsigned transaction");
		println!("{}", pretty(&unsigned_view));
		self.journal
			.record(JournalEntry::now("unsignedTx", unsigned_view))?;

		self.advance(Stage::AwaitingSignature);
		if !self.confirm.confirm("Do you want to sign the TX?")? {
			self.advance(Stage::Aborted);
			return Err(Error::UserAborted("signing"));
		}

		step(2, 3, "wait for the TX signature from the remote signer");
		let account = pipeline.account();
		let signature = match self
			.signer
			.request_signature(
				&account.vault,
				&account.asset_id,
				&account.delegator,
				&hex::encode(&payload.message),
				&payload.note,
			)
			.await
		{
			Ok(sig) => sig,
			Err(e) => return Err(self.fail(e)),
		};

		let signed = match pipeline.assemble(unsigned, &signature) {
			Ok(signed) => signed,
			Err(e) => return Err(self.fail(e)),
		};
		self.advance(Stage::Signed);

		if let Err(e) = pipeline.verify(&signed) {
			return Err(self.fail(e));
		}
		self.advance(Stage::Verified);

		let view = pipeline.describe(&signed);
		println!("* transaction signature received:");
		println!("{}", pretty(&view));
		self.journal.record(JournalEntry::now("signedTx", view))?;

		Ok(signed)
	}

	/// Broadcast a verified transaction when requested and confirmed.
	/// Returns `None` when broadcasting was not requested.
	pub async fn broadcast<P: ChainPipeline>(
		&mut self,
		pipeline: &P,
		signed: &P::Signed,
		requested: bool,
	) -> Result<Option<BroadcastReceipt>> {
		if !requested {
			self.advance(Stage::NotBroadcast);
			return Ok(None);
		}

		if !self.confirm.confirm("Do you want to broadcast TX?")? {
			self.advance(Stage::NotBroadcast);
			return Err(Error::UserAborted("broadcast"));
		}

		step(3, 3, "broadcasting the signed transaction");
		let result = journal::journaled(
			self.journal,
			"txBroadcast",
			pipeline.broadcast(signed),
			|r| json!(r),
		)
		.await;
		let receipt = match result {
			Ok(r) => r,
			Err(e) => return Err(self.fail(e)),
		};

		println!(
			"{}",
			pretty(&json!({
				"code": receipt.code,
				"hash": receipt.tx_id,
				"gasUsed": receipt.gas_used,
				"gasWanted": receipt.gas_wanted,
			}))
		);
		if let Some(link) = pipeline.explorer_link(signed, &receipt) {
			println!("\nCheck TX status here: {link}");
		}

		if receipt.code != 0 {
			return Err(self.fail(Error::BroadcastFailure {
				code: receipt.code,
				tx_id: receipt.tx_id,
				log: receipt.log,
			}));
		}

		self.advance(Stage::Broadcast);
		Ok(Some(receipt))
	}
}

/// Print a `# [n/total] msg` progress banner.
pub fn step(n: u32, total: u32, msg: &str) {
	println!("# [{n}/{total}] {msg}");
}

fn pretty(v: &Value) -> String {
	serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::journal::tests::MemoryJournal;
	use crate::prompt::FixedAnswer;
	use crate::signer::tests::{request, ScriptedBackend};
	use crate::signer::{KeyAlgorithm, PollPolicy, SigningStatus};
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct EchoPipeline {
		account: SigningAccount,
		verify_ok: bool,
		broadcast_code: i64,
		broadcasts: AtomicUsize,
	}

	impl EchoPipeline {
		fn new() -> Self {
			Self {
				account: SigningAccount {
					vault: Vault {
						id: "1".into(),
						name: "staking".into(),
					},
					public_key: PublicKeyMaterial {
						public_key: vec![3; 33],
						algorithm: KeyAlgorithm::Secp256k1,
						asset_id: "T".into(),
						account: 0,
						change: 0,
						address_index: 0,
					},
					asset_id: "T".into(),
					delegator: "me".into(),
				},
				verify_ok: true,
				broadcast_code: 0,
				broadcasts: AtomicUsize::new(0),
			}
		}
	}

	#[async_trait::async_trait]
	impl ChainPipeline for EchoPipeline {
		type Unsigned = String;
		type Signed = Vec<u8>;

		fn account(&self) -> &SigningAccount {
			&self.account
		}

		fn digest(&self, unsigned: &String) -> Result<SignPayload> {
			Ok(SignPayload {
				message: unsigned.as_bytes().to_vec(),
				note: "echo".into(),
			})
		}

		fn assemble(&self, unsigned: String, signature: &SignatureMaterial) -> Result<Vec<u8>> {
			let mut out = unsigned.into_bytes();
			out.extend_from_slice(&signature.rs()?);
			Ok(out)
		}

		fn verify(&self, _signed: &Vec<u8>) -> Result<()> {
			if self.verify_ok {
				Ok(())
			} else {
				self.account.expect_delegator("someone-else")
			}
		}

		fn describe(&self, signed: &Vec<u8>) -> Value {
			json!(hex::encode(signed))
		}

		async fn broadcast(&self, _signed: &Vec<u8>) -> Result<BroadcastReceipt> {
			self.broadcasts.fetch_add(1, Ordering::SeqCst);
			Ok(BroadcastReceipt {
				code: self.broadcast_code,
				..BroadcastReceipt::accepted("TX1")
			})
		}
	}

	fn completing_signer() -> Signer {
		Signer::new(
			Box::new(ScriptedBackend::new(vec![Ok(request(SigningStatus::Completed, "", 1))])),
			PollPolicy::default(),
		)
	}

	#[tokio::test(start_paused = true)]
	async fn happy_path_reaches_broadcast() {
		let signer = completing_signer();
		let journal = MemoryJournal::default();
		let yes = FixedAnswer(true);
		let pipeline = EchoPipeline::new();

		let mut flow = Flow::new(&signer, &journal, &yes);
		let signed = flow.sign(&pipeline, "tx".to_owned()).await.unwrap();
		assert_eq!(flow.stage(), Stage::Verified);
		assert_eq!(signed.len(), 2 + 64);

		let receipt = flow.broadcast(&pipeline, &signed, true).await.unwrap();
		assert_eq!(receipt.unwrap().tx_id, "TX1");
		assert_eq!(flow.stage(), Stage::Broadcast);
		assert_eq!(pipeline.broadcasts.load(Ordering::SeqCst), 1);
		assert_eq!(journal.kinds(), vec!["unsignedTx", "signedTx", "txBroadcast"]);
		assert_eq!(
			flow.history(),
			&[
				Stage::Built,
				Stage::Digested,
				Stage::AwaitingSignature,
				Stage::Signed,
				Stage::Verified,
				Stage::Broadcast
			]
		);
	}

	#[tokio::test(start_paused = true)]
	async fn declining_to_sign_aborts_before_backend() {
		let backend = ScriptedBackend::new(vec![]);
		let signer = Signer::new(Box::new(backend), PollPolicy::default());
		let journal = MemoryJournal::default();
		let no = FixedAnswer(false);
		let pipeline = EchoPipeline::new();

		let mut flow = Flow::new(&signer, &journal, &no);
		let err = flow.sign(&pipeline, "tx".to_owned()).await.unwrap_err();
		assert!(matches!(err, Error::UserAborted(_)));
		assert_eq!(err.exit_code(), 2);
		assert_eq!(flow.stage(), Stage::Aborted);
		assert_eq!(journal.kinds(), vec!["unsignedTx"]);
		assert_eq!(pipeline.broadcasts.load(Ordering::SeqCst), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn verification_failure_fails_the_flow() {
		let signer = completing_signer();
		let journal = MemoryJournal::default();
		let yes = FixedAnswer(true);
		let mut pipeline = EchoPipeline::new();
		pipeline.verify_ok = false;

		let mut flow = Flow::new(&signer, &journal, &yes);
		let err = flow.sign(&pipeline, "tx".to_owned()).await.unwrap_err();
		assert!(matches!(err, Error::AddressMismatch { .. }));
		assert_eq!(flow.stage(), Stage::Failed);
		assert_eq!(journal.kinds(), vec!["unsignedTx"]);
	}

	#[tokio::test(start_paused = true)]
	async fn non_zero_broadcast_code_is_an_error() {
		let signer = completing_signer();
		let journal = MemoryJournal::default();
		let yes = FixedAnswer(true);
		let mut pipeline = EchoPipeline::new();
		pipeline.broadcast_code = 11;

		let mut flow = Flow::new(&signer, &journal, &yes);
		let signed = flow.sign(&pipeline, "tx".to_owned()).await.unwrap();
		let err = flow.broadcast(&pipeline, &signed, true).await.unwrap_err();
		assert!(matches!(err, Error::BroadcastFailure { code: 11, .. }));
		assert_eq!(flow.stage(), Stage::Failed);
	}

	#[tokio::test(start_paused = true)]
	async fn broadcast_not_requested() {
		let signer = completing_signer();
		let journal = MemoryJournal::default();
		let yes = FixedAnswer(true);
		let pipeline = EchoPipeline::new();

		let mut flow = Flow::new(&signer, &journal, &yes);
		let signed = flow.sign(&pipeline, "tx".to_owned()).await.unwrap();
		assert!(flow.broadcast(&pipeline, &signed, false).await.unwrap().is_none());
		assert_eq!(flow.stage(), Stage::NotBroadcast);
		assert_eq!(pipeline.broadcasts.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn transitions() {
		assert!(Stage::AwaitingSignature.can_advance(Stage::Aborted));
		assert!(!Stage::Built.can_advance(Stage::Aborted));
		assert!(!Stage::Built.can_advance(Stage::Signed));
		assert!(Stage::Verified.can_advance(Stage::Failed));
		assert!(!Stage::Broadcast.can_advance(Stage::Failed));
		assert!(Stage::NotBroadcast.is_terminal());
	}
}
