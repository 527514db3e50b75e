pub mod reconcile_op;
