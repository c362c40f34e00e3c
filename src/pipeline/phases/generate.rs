//! Phase 1 — Parameter Generation: spec §4.4. Validates the run's parameter
//! definitions and builds the explorer that phase 2 streams combinations
//! out of; this phase itself never materializes the Cartesian product
//! (spec §4.2/§9 — that would defeat the point of a streaming explorer).

use crate::errors::CoreError;
use crate::params::ParameterSpaceExplorer;
use crate::pipeline::context::PipelineContext;
use std::time::Instant;

pub fn generate(ctx: &PipelineContext) -> Result<PipelineContext, CoreError> {
    let start = Instant::now();
    let explorer = ParameterSpaceExplorer::new(&ctx.config.definitions)?;
    let total = explorer
        .total_combinations()
        .ok_or_else(|| CoreError::InvalidArgument("total combinations overflow i64".into()))?;
    Ok(ctx.with_explorer(explorer, total, start.elapsed()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::value::ParamKind;
    use crate::params::ParameterDefinition;
    use crate::pipeline::context::PipelineConfig;
    use rust_decimal::Decimal;
    use std::path::PathBuf;

    fn config(defs: Vec<ParameterDefinition>) -> PipelineConfig {
        PipelineConfig {
            definitions: defs,
            securities: vec!["AAPL".to_string()],
            training_start: chrono::Utc::now(),
            training_end: chrono::Utc::now(),
            initial_capital: Decimal::new(10000, 0),
            trade_volume: Decimal::new(100, 0),
            parallel_workers: 2,
            metric_filters: Vec::new(),
            export_dir: PathBuf::from("/tmp/export"),
        }
    }

    #[test]
    fn populates_full_cartesian_product() {
        let def = ParameterDefinition::new(
            "fast",
            ParamKind::Integer,
            Some(crate::params::value::ParamValue::Integer(1)),
            Some(crate::params::value::ParamValue::Integer(3)),
            None,
            Some(crate::params::value::ParamValue::Integer(1)),
            true,
        )
        .unwrap();
        let ctx = PipelineContext::new(config(vec![def]));
        let ctx = generate(&ctx).unwrap();
        assert_eq!(ctx.diagnostics.get("generate").unwrap().count, 3);
        let explorer = ctx.explorer.unwrap();
        assert_eq!(explorer.total_combinations(), Some(3));
    }

    #[test]
    fn empty_definitions_is_fatal() {
        let ctx = PipelineContext::new(config(vec![]));
        assert!(matches!(generate(&ctx), Err(CoreError::EmptyDefinitions)));
    }
}
