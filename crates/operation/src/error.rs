use thiserror::Error;

use super::OperationId;

#[derive(Debug, Clone, Error)]
pub enum Error {
	#[error("operation <id='{0}'> was abandoned before reporting an outcome")]
	Abandoned(OperationId),
	#[error("operation <id='{0}'> already delivered its outcome")]
	AlreadyDelivered(OperationId),
}
