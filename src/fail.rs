// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use custom_error::custom_error;

custom_error! {
    /// Error kinds surfaced by the driver and the components it owns.
    ///
    /// Construction-time failures (`GraphFailure`, `ResourceCreationFailure`)
    /// abort driver construction; everything else is a per-resource runtime
    /// failure that gets logged, counted, and the action graph keeps moving.
    #[derive(PartialEq, Clone)]
    pub Fail

    GraphFailure{details: &'static str} = "graph failure: {details}",
    ResourceCreationFailure{resource: &'static str, details: &'static str} =
        "failed to create {resource}: {details}",
    TransportFailure{details: &'static str} = "transport failure: {details}",
    TransferTimeout = "transfer timed out",
    TransferStalled = "transfer stalled",
    UnknownAction{details: &'static str} = "unknown action: {details}",
}
