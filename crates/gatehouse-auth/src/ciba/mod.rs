//! Client-initiated backchannel authentication (CIBA).

mod controller;
mod notify;
mod request;
mod validator;

pub use controller::{
    BackchannelAuthResponse, BackchannelParams, CibaFlowController, CibaOutcome,
};
pub use notify::{CallbackTransport, CibaNotifier, HttpCallbackTransport};
pub use request::{CibaRequest, CibaStatus, DeliveryState};
pub use validator::{CibaValidator, HttpUriListFetcher, UriListFetcher};
