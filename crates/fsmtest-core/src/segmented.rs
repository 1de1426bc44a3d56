/// One segment of a segmented trace: a vector of input codes of which only
/// the first `prefix` elements are live (the tail is kept so a shortened
/// segment can be rolled back), plus the machine state reached after the
/// live portion. The target is `None` while a trace is under construction.
#[derive(Debug, Clone, Default)]
pub struct TraceSegment {
    inputs: Vec<u32>,
    prefix: Option<usize>,
    target: Option<usize>,
}

impl TraceSegment {
    pub fn new(inputs: Vec<u32>) -> Self {
        TraceSegment { inputs, prefix: None, target: None }
    }

    pub fn with_target(inputs: Vec<u32>, target: usize) -> Self {
        TraceSegment { inputs, prefix: None, target: Some(target) }
    }

    pub fn set_prefix(&mut self, prefix: usize) {
        self.prefix = Some(prefix);
    }

    pub fn prefix(&self) -> Option<usize> {
        self.prefix
    }

    pub fn set_target(&mut self, target: usize) {
        self.target = Some(target);
    }

    pub fn target(&self) -> Option<usize> {
        self.target
    }

    /// The live portion of the segment.
    pub fn live(&self) -> &[u32] {
        let n = self.prefix.unwrap_or(self.inputs.len()).min(self.inputs.len());
        &self.inputs[..n]
    }

    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.live().is_empty()
    }

    /// Element of the live portion, `None` at or beyond the prefix bound.
    pub fn at(&self, n: usize) -> Option<u32> {
        self.live().get(n).copied()
    }
}

/// A sequence of trace segments; the represented input trace is the
/// concatenation of all live segment portions. Equality compares that
/// flattened content, not the segment structure.
#[derive(Debug, Clone, Default)]
pub struct SegmentedTrace {
    segments: Vec<TraceSegment>,
}

impl SegmentedTrace {
    pub fn new(segments: Vec<TraceSegment>) -> Self {
        SegmentedTrace { segments }
    }

    pub fn push(&mut self, seg: TraceSegment) {
        self.segments.push(seg);
    }

    pub fn segments(&self) -> &[TraceSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn front(&self) -> Option<&TraceSegment> {
        self.segments.first()
    }

    pub fn back(&self) -> Option<&TraceSegment> {
        self.segments.last()
    }

    /// State reached after the final segment.
    pub fn target(&self) -> Option<usize> {
        self.segments.last().and_then(|s| s.target())
    }

    pub fn flatten(&self) -> Vec<u32> {
        let mut v = Vec::new();
        for s in &self.segments {
            v.extend_from_slice(s.live());
        }
        v
    }
}

impl PartialEq for SegmentedTrace {
    fn eq(&self, other: &Self) -> bool {
        self.flatten() == other.flatten()
    }
}

impl Eq for SegmentedTrace {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_prefix() {
        let mut seg = TraceSegment::new(vec![3, 1, 4, 1]);
        assert_eq!(seg.live(), &[3, 1, 4, 1]);
        seg.set_prefix(2);
        assert_eq!(seg.live(), &[3, 1]);
        assert_eq!(seg.len(), 2);
        // Prefix beyond the stored vector clamps.
        seg.set_prefix(9);
        assert_eq!(seg.len(), 4);
    }

    #[test]
    fn test_at_respects_prefix() {
        let mut seg = TraceSegment::new(vec![5, 6, 7]);
        seg.set_prefix(2);
        assert_eq!(seg.at(1), Some(6));
        assert_eq!(seg.at(2), None);
        assert_eq!(seg.at(99), None);
    }

    #[test]
    fn test_flatten_and_eq() {
        let mut a = SegmentedTrace::default();
        a.push(TraceSegment::new(vec![0, 1]));
        let mut tail = TraceSegment::new(vec![2, 3]);
        tail.set_prefix(1);
        a.push(tail);
        assert_eq!(a.flatten(), vec![0, 1, 2]);

        let b = SegmentedTrace::new(vec![TraceSegment::new(vec![0, 1, 2])]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_target_tracks_last_segment() {
        let mut t = SegmentedTrace::new(vec![TraceSegment::with_target(vec![0], 4)]);
        assert_eq!(t.target(), Some(4));
        t.push(TraceSegment::new(vec![1]));
        assert_eq!(t.target(), None);
    }
}
