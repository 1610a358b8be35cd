use std::sync::Mutex;

/// Events emitted while a reverse-sampling run advances.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    SamplingStart { total_steps: usize },
    /// Emitted before the reverse step from `t` to `t - dt`.
    StepStart { step: usize, t: f64, dt: f64 },
    StepFinish { step: usize, total_steps: usize },
    SamplingFinish,
}

pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    /// A reporter that appends every event to `sink`.
    pub fn collecting(sink: &'a Mutex<Vec<Progress>>) -> Self {
        Self::with_callback(Box::new(move |event| {
            if let Ok(mut events) = sink.lock() {
                events.push(event);
            }
        }))
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_reporter_drops_events() {
        let reporter = ProgressReporter::new();
        reporter.report(Progress::SamplingFinish);
    }

    #[test]
    fn collecting_reporter_records_events_in_order() {
        let sink = Mutex::new(Vec::new());
        let reporter = ProgressReporter::collecting(&sink);
        reporter.report(Progress::SamplingStart { total_steps: 2 });
        reporter.report(Progress::StepStart {
            step: 0,
            t: 1.0,
            dt: 0.5,
        });
        reporter.report(Progress::SamplingFinish);
        drop(reporter);

        let events = sink.into_inner().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], Progress::SamplingStart { total_steps: 2 });
        assert_eq!(events[2], Progress::SamplingFinish);
    }
}
