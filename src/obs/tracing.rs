// self
use crate::{_prelude::*, obs::StepKind};

/// A span builder used by provisioning steps.
#[derive(Clone, Debug)]
pub struct StepSpan {
	span: tracing::Span,
}
impl StepSpan {
	/// Creates a new span tagged with the provided step kind + stage.
	pub fn new(kind: StepKind, stage: &'static str) -> Self {
		let span = tracing::info_span!("device_provisioning.step", step = kind.as_str(), stage);

		Self { span }
	}

	/// Enters the span for synchronous sections.
	pub fn entered(self) -> tracing::span::EnteredSpan {
		self.span.entered()
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> tracing::instrument::Instrumented<Fut>
	where
		Fut: Future,
	{
		use tracing::Instrument;

		fut.instrument(self.span.clone())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn entered_guard_is_usable_without_subscriber() {
		let _guard = StepSpan::new(StepKind::Ownership, "test").entered();
	}

	#[tokio::test]
	async fn instrument_wraps_future() {
		let span = StepSpan::new(StepKind::Credentials, "instrument_wraps_future");
		let value = span.instrument(async { 42 }).await;

		assert_eq!(value, 42);
	}
}
