//! Controller database handle.

netbeacon_core::define_database!(ControllerDatabase, "Controller database migrations complete");
