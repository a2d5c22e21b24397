pub mod execution_repo;
