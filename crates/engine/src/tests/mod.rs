mod helpers;

mod column_family_tests;
mod manifest_tests;
mod memory_tests;
mod model_tests;
mod recovery_tests;
