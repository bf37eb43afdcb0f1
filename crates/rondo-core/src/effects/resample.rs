//! Sample plumbing between the decoder thread and the output callback.
//!
//! Everything here is plain data: a bounded ring of interleaved f32
//! samples, a linear-interpolation rate converter, and a channel mapper.
//! The device is opened once at a fixed rate and channel count, so every
//! track is converted to that shape before it reaches the ring.

/// Bounded FIFO of interleaved samples. `push` takes what fits and reports
/// the count; the decoder sleeps and retries the remainder.
pub(crate) struct SampleRing {
    buf: Vec<f32>,
    read_pos: usize,
    write_pos: usize,
    len: usize,
}

impl SampleRing {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0.0; capacity.max(1)],
            read_pos: 0,
            write_pos: 0,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn free(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Returns how many samples were accepted.
    pub(crate) fn push(&mut self, samples: &[f32]) -> usize {
        let n = samples.len().min(self.free());
        let cap = self.buf.len();
        for &s in &samples[..n] {
            self.buf[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % cap;
        }
        self.len += n;
        n
    }

    /// Fill `out` from the ring; the unfilled tail is zeroed.
    pub(crate) fn pull(&mut self, out: &mut [f32]) -> usize {
        let n = out.len().min(self.len);
        let cap = self.buf.len();
        for sample in out.iter_mut().take(n) {
            *sample = self.buf[self.read_pos];
            self.read_pos = (self.read_pos + 1) % cap;
        }
        self.len -= n;
        out[n..].fill(0.0);
        n
    }

    pub(crate) fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.len = 0;
    }
}

/// Linear interpolation resampler. Keeps fractional phase across calls so
/// packet boundaries do not click.
pub(crate) struct LinearResampler {
    /// Source frames consumed per output frame.
    step: f64,
    phase: f64,
    channels: usize,
    /// Last frame of the previous chunk, for interpolating across the seam.
    carry: Vec<f32>,
}

impl LinearResampler {
    pub(crate) fn new(src_rate: u32, dst_rate: u32, channels: u16) -> Self {
        Self {
            step: src_rate.max(1) as f64 / dst_rate.max(1) as f64,
            phase: 0.0,
            channels: channels.max(1) as usize,
            carry: Vec::new(),
        }
    }

    pub(crate) fn is_needed(&self) -> bool {
        (self.step - 1.0).abs() > 1e-6
    }

    /// Forget inter-chunk state, e.g. after a seek.
    pub(crate) fn reset(&mut self) {
        self.phase = 0.0;
        self.carry.clear();
    }

    pub(crate) fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if !self.is_needed() {
            return input.to_vec();
        }
        let ch = self.channels;

        // Prepend the carried frame so index 0 is the seam frame.
        let mut frames = Vec::with_capacity(self.carry.len() + input.len());
        frames.extend_from_slice(&self.carry);
        frames.extend_from_slice(input);
        let total = frames.len() / ch;
        if total < 2 {
            self.carry = frames;
            return Vec::new();
        }

        let mut output = Vec::with_capacity(((total as f64) / self.step).ceil() as usize * ch);
        while self.phase + 1.0 < total as f64 {
            let idx = self.phase as usize;
            let frac = (self.phase - idx as f64) as f32;
            for c in 0..ch {
                let s0 = frames[idx * ch + c];
                let s1 = frames[(idx + 1) * ch + c];
                output.push(s0 + (s1 - s0) * frac);
            }
            self.phase += self.step;
        }

        // Keep the last frame; phase becomes relative to it.
        self.phase -= (total - 1) as f64;
        self.carry = frames[(total - 1) * ch..total * ch].to_vec();
        output
    }
}

/// Map interleaved samples between channel counts. Mono fans out, stereo+
/// to mono averages, anything else copies the shared channels and zero-fills.
pub(crate) fn adapt_channels(src: &[f32], src_ch: u16, dst_ch: u16) -> Vec<f32> {
    let src_ch = src_ch.max(1) as usize;
    let dst_ch = dst_ch.max(1) as usize;
    if src_ch == dst_ch {
        return src.to_vec();
    }

    let frames = src.len() / src_ch;
    let mut dst = vec![0.0f32; frames * dst_ch];
    for (frame, out) in src.chunks_exact(src_ch).zip(dst.chunks_exact_mut(dst_ch)) {
        if src_ch == 1 {
            out.fill(frame[0]);
        } else if dst_ch == 1 {
            out[0] = frame.iter().sum::<f32>() / src_ch as f32;
        } else {
            let shared = src_ch.min(dst_ch);
            out[..shared].copy_from_slice(&frame[..shared]);
        }
    }
    dst
}
