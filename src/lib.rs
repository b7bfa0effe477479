//! # netdefsim
//!
//! 2隻の防御艇が網を張って侵入艇を捕獲し、母艦を守る多エージェント
//! 強化学習環境です。エピソード境界の決定、敵艇個体群の一貫性維持、
//! 整形報酬の計算を担います。

pub mod collision;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod reward;
pub mod scenario;
pub mod simulation;
pub mod world;
