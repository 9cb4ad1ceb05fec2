// pandora-test-utils: Shared test utilities for the pandora-cas workspace.
//
// Provides a scriptable mock of the Pandora cloud (HTTP login / updates /
// command plus the updates WebSocket on one listener) for integration
// testing of the client.

pub mod mock_cloud;

pub use mock_cloud::MockCloud;
