use std::io;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ServiceCreateError {
    #[error("a service with this name already exists")]
    AlreadyExists,

    #[error("the registry has no free service record")]
    ExceedsMaxNumberOfServices,

    #[error("the requested limits describe a service too large to map")]
    InvalidConfiguration,

    #[error("insufficient permissions to create the service")]
    InsufficientPermissions,

    #[error("internal failure while creating the service")]
    InternalFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ServiceOpenError {
    #[error("the service does not exist")]
    DoesNotExist,

    #[error("the service uses a different messaging pattern")]
    IncompatibleMessagingPattern,

    #[error("the service transports a different payload type")]
    IncompatibleTypes,

    #[error("the service supports fewer publishers than requested")]
    DoesNotSupportRequestedAmountOfPublishers,

    #[error("the service supports fewer subscribers than requested")]
    DoesNotSupportRequestedAmountOfSubscribers,

    #[error("the service supports fewer notifiers than requested")]
    DoesNotSupportRequestedAmountOfNotifiers,

    #[error("the service supports fewer listeners than requested")]
    DoesNotSupportRequestedAmountOfListeners,

    #[error("the service supports fewer clients than requested")]
    DoesNotSupportRequestedAmountOfClients,

    #[error("the service supports fewer servers than requested")]
    DoesNotSupportRequestedAmountOfServers,

    #[error("the service's subscriber buffer is smaller than requested")]
    DoesNotSupportRequestedMinBufferSize,

    #[error("the service allows fewer borrowed samples than requested")]
    DoesNotSupportRequestedMinSubscriberBorrowedSamples,

    #[error("the service allows fewer loaned samples than requested")]
    DoesNotSupportRequestedAmountOfLoanedSamples,

    #[error("the service's maximum slice length is smaller than requested")]
    DoesNotSupportRequestedMaxSliceLen,

    #[error("the service's largest event id is smaller than requested")]
    DoesNotSupportRequestedMaxEventId,

    #[error("the service allows fewer active requests per client than requested")]
    DoesNotSupportRequestedAmountOfActiveRequestsPerClient,

    #[error("the service's response buffer is smaller than requested")]
    DoesNotSupportRequestedResponseBufferSize,

    #[error("the service allows fewer borrowed responses per pending response than requested")]
    DoesNotSupportRequestedAmountOfBorrowedResponsesPerPendingResponse,

    #[error("the service allows fewer loaned requests than requested")]
    DoesNotSupportRequestedAmountOfLoanedRequests,

    #[error("the service allows fewer loaned responses per server than requested")]
    DoesNotSupportRequestedAmountOfLoanedResponses,

    #[error("the service's overflow behavior differs from the requested one")]
    IncompatibleOverflowBehavior,

    #[error("the service is already held by the maximum number of nodes")]
    ExceedsMaxNumberOfNodes,

    #[error("the service's shared memory is missing or corrupted")]
    ServiceInCorruptedState,

    #[error("insufficient permissions to open the service")]
    InsufficientPermissions,

    #[error("internal failure while opening the service")]
    InternalFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ServiceOpenOrCreateError {
    #[error("open failed: {0}")]
    Open(#[from] ServiceOpenError),

    #[error("create failed: {0}")]
    Create(#[from] ServiceCreateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ServiceDoesExistError {
    #[error("insufficient permissions to inspect the registry")]
    InsufficientPermissions,

    #[error("internal failure while inspecting the registry")]
    InternalFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ServiceListError {
    #[error("insufficient permissions to inspect the registry")]
    InsufficientPermissions,

    #[error("internal failure while inspecting the registry")]
    InternalFailure,
}

macro_rules! from_io_error {
    ($failure:ident, $what:literal) => {
        impl From<io::Error> for $failure {
            fn from(e: io::Error) -> Self {
                error!(error = %e, $what);
                match e.kind() {
                    io::ErrorKind::PermissionDenied => $failure::InsufficientPermissions,
                    _ => $failure::InternalFailure,
                }
            }
        }
    };
}

from_io_error!(ServiceCreateError, "service creation failed");
from_io_error!(ServiceOpenError, "service open failed");
from_io_error!(ServiceDoesExistError, "service lookup failed");
from_io_error!(ServiceListError, "service listing failed");
