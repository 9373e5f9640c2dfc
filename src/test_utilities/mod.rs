pub mod mock_node;
pub mod mocks;
