//! Initialization sequencer.
//!
//! Replays an entry's `init` steps against its device strictly in document
//! order and stops at the first failure. Steps are never reordered: a
//! sequence that depends on an earlier step (`mimic` before `set_voltage`)
//! fails when the order is reversed.

use labrig_core::{format_arguments, Result, RigError};
use tokio_util::sync::CancellationToken;

use crate::config::InitStep;
use crate::device::DeviceInstance;

/// Run `steps` on `device` in order.
///
/// The token is checked before every step; a step already in flight is
/// allowed to finish. Returns the number of steps executed.
///
/// # Errors
/// - `Initialization { index, operation, source }` for the first failing step
/// - `Cancelled { completed }` when the token fires between steps
pub async fn run(
    device: &DeviceInstance,
    steps: &[InitStep],
    cancel: &CancellationToken,
) -> Result<usize> {
    for (index, step) in steps.iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::debug!(device = %device.name(), completed = index, "initialization cancelled");
            return Err(RigError::Cancelled { completed: index });
        }

        tracing::debug!(
            device = %device.name(),
            step = index,
            operation = %step.operation,
            args = %format_arguments(&step.arguments),
            "init step"
        );

        if let Err(source) = device.call(&step.operation, step.arguments.clone()).await {
            tracing::warn!(
                device = %device.name(),
                step = index,
                operation = %step.operation,
                error = %source,
                "init step failed"
            );
            return Err(RigError::Initialization {
                index,
                operation: step.operation.clone(),
                source: Box::new(source),
            });
        }
    }
    Ok(steps.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DriverRegistry;
    use crate::testing::{StubSupplyFactory, STUB_DEFINITION, STUB_OBJECT};
    use labrig_core::{arguments, Arguments, ErrorKind, NullChannel};
    use std::sync::Arc;

    fn shim() -> DeviceInstance {
        let mut registry = DriverRegistry::new();
        registry
            .register(STUB_DEFINITION, STUB_OBJECT, Arc::new(StubSupplyFactory::new()))
            .unwrap();
        DeviceInstance::new_virtual(
            "A",
            Box::new(NullChannel::new("GPIB0::99::INSTR")),
            Arc::new(registry),
            Arguments::new(),
        )
    }

    fn mimic() -> InitStep {
        InitStep::new(
            "mimic",
            arguments! { "object" => STUB_OBJECT, "definition" => STUB_DEFINITION },
        )
    }

    fn set_voltage() -> InitStep {
        InitStep::new("set_voltage", arguments! { "voltage" => 0 })
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let device = shim();
        let steps = vec![mimic(), set_voltage(), InitStep::new("off", arguments! {})];
        let completed = run(&device, &steps, &CancellationToken::new()).await.unwrap();
        assert_eq!(completed, 3);

        let ops: Vec<String> = device
            .call_trace()
            .await
            .into_iter()
            .map(|r| r.operation)
            .collect();
        assert_eq!(ops, vec!["mimic", "set_voltage", "off"]);
    }

    #[tokio::test]
    async fn test_order_is_never_changed() {
        let device = shim();
        let steps = vec![set_voltage(), mimic()];
        let err = run(&device, &steps, &CancellationToken::new())
            .await
            .unwrap_err();

        let RigError::Initialization { index, operation, source } = err else {
            panic!("expected an initialization error");
        };
        assert_eq!(index, 0);
        assert_eq!(operation, "set_voltage");
        assert_eq!(source.kind(), ErrorKind::UnknownOperation);
        // fail-fast: mimic never ran
        assert!(device.bound_object().await.is_none());
    }

    #[tokio::test]
    async fn test_failure_reports_index_of_first_bad_step() {
        let device = shim();
        let steps = vec![
            mimic(),
            set_voltage(),
            InitStep::new("set_voltage", arguments! { "voltage" => "high" }),
            InitStep::new("off", arguments! {}),
        ];
        let err = run(&device, &steps, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Initialization);
        assert_eq!(err.root_cause().kind(), ErrorKind::InvalidArgument);
        assert!(matches!(err, RigError::Initialization { index: 2, .. }));
        assert_eq!(device.call_trace().await.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_next_step() {
        let device = shim();
        let token = CancellationToken::new();
        token.cancel();
        let err = run(&device, &[mimic()], &token).await.unwrap_err();
        assert_eq!(err, RigError::Cancelled { completed: 0 });
        assert!(device.call_trace().await.is_empty());
    }
}
