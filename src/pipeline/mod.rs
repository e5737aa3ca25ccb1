pub mod stage1_index;
pub mod stage2_folds;
pub mod stage3_training;
pub mod stage4_ensemble;
pub mod stage5_balance;
pub mod stage6_output;
