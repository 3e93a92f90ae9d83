// Integration tests for broker-backed RPC round trips.
// These verify the command/telemetry correlation across real services.

#[cfg(test)]
mod broker_roundtrip_tests {
    // Note: These are placeholder tests. Full integration testing requires:
    // 1. A NATS server with JetStream enabled
    // 2. At least one service process (mount is the cheapest)
    //
    // For now, RPC correlation is covered by the unit tests in
    // src/messaging and by staging runs.

    #[test]
    #[ignore] // Requires a JetStream-enabled NATS server
    fn test_mount_status_rpc_round_trip() {
        // TODO: Start nats-server -js, serve the mount service, issue
        // `status` as an RPC and assert the reply correlates.
        todo!("RPC round trip exercised manually against staging");
    }

    #[test]
    #[ignore] // Requires a JetStream-enabled NATS server
    fn test_rpc_timeout_frees_the_pending_slot() {
        // TODO: Issue an RPC against a service that never answers, assert
        // null after the timeout and that a subsequent call succeeds.
        todo!("Timeout path exercised manually against staging");
    }

    #[test]
    #[ignore] // Requires a NATS server and two service processes
    fn test_scheduler_dispatches_in_aos_order() {
        // TODO: Seed a catalog with two non-overlapping passes, run
        // scheduler + orchestrator, assert dispatch order by task telemetry.
        todo!("Dispatch ordering exercised manually against staging");
    }
}
