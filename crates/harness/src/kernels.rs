//! Reference NCHW kernels
//!
//! Naive loops over row-major `[N, C, H, W]` buffers. Integer kernels work on
//! sign-extended codewords held in `i64` and never round through floats.

use fixcnn_fixed_point::{round_half_even, shift_round_half_even};
use fixcnn_model::Padding;

use crate::error::{HarnessError, Result};

/// Validate a rank-4 shape
pub fn nchw(shape: &[usize]) -> Result<[usize; 4]> {
    match shape {
        &[n, c, h, w] => Ok([n, c, h, w]),
        _ => Err(HarnessError::InvalidInput(format!(
            "expected an NCHW tensor, got shape {:?}",
            shape
        ))),
    }
}

fn output_extent(size: usize, kernel: usize, stride: usize) -> Result<usize> {
    if kernel == 0 || stride == 0 || size < kernel {
        return Err(HarnessError::InvalidInput(format!(
            "window {} with stride {} does not fit extent {}",
            kernel, stride, size
        )));
    }
    Ok((size - kernel) / stride + 1)
}

/// Pad the spatial axes with `fill`
pub fn pad<T: Copy>(
    input: &[T],
    shape: [usize; 4],
    padding: Padding,
    fill: T,
) -> (Vec<T>, [usize; 4]) {
    let [n, c, h, w] = shape;
    let ph = h + padding.top + padding.bottom;
    let pw = w + padding.left + padding.right;
    let mut output = vec![fill; n * c * ph * pw];

    for plane in 0..n * c {
        for y in 0..h {
            let src = plane * h * w + y * w;
            let dst = plane * ph * pw + (y + padding.top) * pw + padding.left;
            output[dst..dst + w].copy_from_slice(&input[src..src + w]);
        }
    }
    (output, [n, c, ph, pw])
}

/// Integer rescaling applied to a convolution accumulator.
///
/// `acc = (sum(x * w) << input_shift) + (bias << bias_shift)`, then
/// `y = saturate(round_half_even(acc / 2^output_shift))` to a signed
/// `bits`-wide integer. A negative `output_shift` multiplies. The
/// accumulator saturates at the `i64` bounds instead of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requantize {
    pub input_shift: u32,
    pub bias_shift: u32,
    pub output_shift: i32,
    pub bits: u8,
}

/// Clamp to the range of a signed `bits`-wide integer
pub fn saturate(value: i64, bits: u8) -> i64 {
    let bits = bits.clamp(1, 63) as u32;
    let max = (1i64 << (bits - 1)) - 1;
    let min = -(1i64 << (bits - 1));
    value.clamp(min, max)
}

fn shift_left(value: i64, shift: u32) -> i64 {
    shift_round_half_even(value, -(shift.min(63) as i32))
}

/// Integer 2D convolution
///
/// - `input`:   [N, Ci, H, W] (already padded)
/// - `weights`: [Co, Ci, Kh, Kw]
/// - `bias`:    [Co]
/// - returns:   [N, Co, Ho, Wo]
pub fn conv2d_int(
    input: &[i64],
    input_shape: [usize; 4],
    weights: &[i64],
    weight_shape: [usize; 4],
    bias: &[i64],
    stride: [usize; 2],
    requant: Requantize,
) -> Result<(Vec<i64>, [usize; 4])> {
    let [n, ci, h, w] = input_shape;
    let [co, wci, kh, kw] = weight_shape;
    let [sh, sw] = stride;
    if wci != ci {
        return Err(HarnessError::InvalidInput(format!(
            "weights expect {} input channels, input has {}",
            wci, ci
        )));
    }
    if bias.len() != co {
        return Err(HarnessError::InvalidInput(format!(
            "bias has {} entries for {} output channels",
            bias.len(),
            co
        )));
    }
    let ho = output_extent(h, kh, sh)?;
    let wo = output_extent(w, kw, sw)?;

    let mut output = vec![0i64; n * co * ho * wo];
    for batch in 0..n {
        for oc in 0..co {
            let bias_term = shift_left(bias[oc], requant.bias_shift);
            for oy in 0..ho {
                for ox in 0..wo {
                    let mut sum = 0i64;
                    for ic in 0..ci {
                        for ky in 0..kh {
                            for kx in 0..kw {
                                let iy = oy * sh + ky;
                                let ix = ox * sw + kx;
                                let in_idx = ((batch * ci + ic) * h + iy) * w + ix;
                                let w_idx = ((oc * ci + ic) * kh + ky) * kw + kx;
                                let product = input[in_idx].saturating_mul(weights[w_idx]);
                                sum = sum.saturating_add(product);
                            }
                        }
                    }
                    let acc = shift_left(sum, requant.input_shift).saturating_add(bias_term);
                    let scaled = shift_round_half_even(acc, requant.output_shift);
                    let out_idx = ((batch * co + oc) * ho + oy) * wo + ox;
                    output[out_idx] = saturate(scaled, requant.bits);
                }
            }
        }
    }
    Ok((output, [n, co, ho, wo]))
}

/// 2D max pooling
pub fn max_pool<T: Copy + PartialOrd>(
    input: &[T],
    input_shape: [usize; 4],
    kernel: [usize; 2],
    stride: [usize; 2],
) -> Result<(Vec<T>, [usize; 4])> {
    let [n, c, h, w] = input_shape;
    let [kh, kw] = kernel;
    let [sh, sw] = stride;
    let ho = output_extent(h, kh, sh)?;
    let wo = output_extent(w, kw, sw)?;

    let mut output = Vec::with_capacity(n * c * ho * wo);
    for plane in 0..n * c {
        let base = plane * h * w;
        for oy in 0..ho {
            for ox in 0..wo {
                let mut max_val = input[base + oy * sh * w + ox * sw];
                for ky in 0..kh {
                    for kx in 0..kw {
                        let value = input[base + (oy * sh + ky) * w + ox * sw + kx];
                        if value > max_val {
                            max_val = value;
                        }
                    }
                }
                output.push(max_val);
            }
        }
    }
    Ok((output, [n, c, ho, wo]))
}

/// Global average pooling to `[N, C, 1, 1]`
pub fn global_avg_pool(input: &[f64], shape: [usize; 4]) -> (Vec<f64>, [usize; 4]) {
    let count = shape[2] * shape[3];
    let output = input
        .chunks(count.max(1))
        .take(shape[0] * shape[1])
        .map(|plane| plane.iter().sum::<f64>() / count as f64)
        .collect();
    (output, [shape[0], shape[1], 1, 1])
}

/// Integer global average pooling; the mean rounds half to even
pub fn global_avg_pool_int(input: &[i64], shape: [usize; 4]) -> (Vec<i64>, [usize; 4]) {
    let count = shape[2] * shape[3];
    let output = input
        .chunks(count.max(1))
        .take(shape[0] * shape[1])
        .map(|plane| {
            let sum: i64 = plane.iter().sum();
            round_half_even(sum as f64 / count as f64) as i64
        })
        .collect();
    (output, [shape[0], shape[1], 1, 1])
}

pub fn relu<T: Copy + PartialOrd + Default>(input: &[T]) -> Vec<T> {
    let zero = T::default();
    input
        .iter()
        .map(|&v| if v < zero { zero } else { v })
        .collect()
}

/// Float leaky ReLU; negative products go through `requantize`
pub fn leaky_relu(input: &[f64], slope: f64, requantize: impl Fn(f64) -> f64) -> Vec<f64> {
    input
        .iter()
        .map(|&v| if v < 0.0 { requantize(v * slope) } else { v })
        .collect()
}

/// Integer leaky ReLU; negative products round half to even
pub fn leaky_relu_int(input: &[i64], slope: f64) -> Vec<i64> {
    input
        .iter()
        .map(|&v| {
            if v < 0 {
                round_half_even(v as f64 * slope) as i64
            } else {
                v
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY: Requantize = Requantize {
        input_shift: 0,
        bias_shift: 0,
        output_shift: 0,
        bits: 16,
    };

    #[test]
    fn test_pad() {
        let (out, shape) = pad(
            &[1, 2, 3, 4],
            [1, 1, 2, 2],
            Padding { top: 1, left: 0, bottom: 0, right: 1 },
            0i64,
        );
        assert_eq!(shape, [1, 1, 3, 3]);
        assert_eq!(out, vec![0, 0, 0, 1, 2, 0, 3, 4, 0]);
    }

    #[test]
    fn test_conv_identity_kernel() {
        let input: Vec<i64> = (1..=9).collect();
        let (out, shape) =
            conv2d_int(&input, [1, 1, 3, 3], &[1], [1, 1, 1, 1], &[0], [1, 1], IDENTITY).unwrap();
        assert_eq!(shape, [1, 1, 3, 3]);
        assert_eq!(out, input);
    }

    #[test]
    fn test_conv_sum_and_bias() {
        let input: Vec<i64> = (1..=9).collect();
        let (out, shape) = conv2d_int(
            &input,
            [1, 1, 3, 3],
            &[1, 1, 1, 1],
            [1, 1, 2, 2],
            &[10],
            [1, 1],
            IDENTITY,
        )
        .unwrap();
        assert_eq!(shape, [1, 1, 2, 2]);
        assert_eq!(out, vec![1 + 2 + 4 + 5 + 10, 2 + 3 + 5 + 6 + 10, 24 + 10, 28 + 10]);
    }

    #[test]
    fn test_conv_multi_channel_stride() {
        // Two input channels, two output channels, 1x1 kernel, stride 2
        let input: Vec<i64> = vec![1, 2, 3, 4, 10, 20, 30, 40];
        let weights = vec![1, 1, 2, -1];
        let (out, shape) =
            conv2d_int(&input, [1, 2, 2, 2], &weights, [2, 2, 1, 1], &[0, 0], [2, 2], IDENTITY)
                .unwrap();
        assert_eq!(shape, [1, 2, 1, 1]);
        assert_eq!(out, vec![11, 2 - 10]);
    }

    #[test]
    fn test_conv_requantize_rounds_and_saturates() {
        let requant = Requantize {
            input_shift: 0,
            bias_shift: 0,
            output_shift: 2,
            bits: 4,
        };
        let (out, _) =
            conv2d_int(&[10, 6, 100, -100], [1, 1, 2, 2], &[1], [1, 1, 1, 1], &[0], [1, 1], requant)
                .unwrap();
        // 2.5 -> 2, 1.5 -> 2, 25 -> 7, -25 -> -8
        assert_eq!(out, vec![2, 2, 7, -8]);
    }

    #[test]
    fn test_conv_wide_shifts_saturate() {
        let requant = Requantize {
            input_shift: 70,
            bias_shift: 70,
            output_shift: 0,
            bits: 16,
        };
        let (out, _) =
            conv2d_int(&[1, -1, 0, 0], [1, 1, 2, 2], &[1], [1, 1, 1, 1], &[0], [1, 1], requant)
                .unwrap();
        assert_eq!(out, vec![32767, -32768, 0, 0]);

        let (out, _) =
            conv2d_int(&[0], [1, 1, 1, 1], &[1], [1, 1, 1, 1], &[-2], [1, 1], requant).unwrap();
        assert_eq!(out, vec![-32768]);
    }

    #[test]
    fn test_conv_rejects_channel_mismatch() {
        assert!(conv2d_int(&[0; 4], [1, 1, 2, 2], &[0; 2], [1, 2, 1, 1], &[0], [1, 1], IDENTITY)
            .is_err());
        assert!(conv2d_int(&[0; 4], [1, 1, 2, 2], &[0; 9], [1, 1, 3, 3], &[0], [1, 1], IDENTITY)
            .is_err());
    }

    #[test]
    fn test_max_pool() {
        let input: Vec<i64> = vec![1, 5, 2, 0, 3, 4, -1, 8, 7, 6, 9, -2, 0, 0, 1, 1];
        let (out, shape) = max_pool(&input, [1, 1, 4, 4], [2, 2], [2, 2]).unwrap();
        assert_eq!(shape, [1, 1, 2, 2]);
        assert_eq!(out, vec![5, 8, 7, 9]);
    }

    #[test]
    fn test_global_avg_pool() {
        let (out, shape) = global_avg_pool(&[1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 1.0], [1, 2, 2, 2]);
        assert_eq!(shape, [1, 2, 1, 1]);
        assert_eq!(out, vec![2.5, 0.25]);

        let (out, _) = global_avg_pool_int(&[1, 2, 3, 4, 1, 1, 1, 2], [1, 2, 2, 2]);
        // 2.5 -> 2, 1.25 -> 1
        assert_eq!(out, vec![2, 1]);
    }

    #[test]
    fn test_activations() {
        assert_eq!(relu(&[-1i64, 0, 3]), vec![0, 0, 3]);
        assert_eq!(relu(&[-0.5, 2.0]), vec![0.0, 2.0]);
        assert_eq!(leaky_relu_int(&[-20, -4, 5], 0.125), vec![-2, 0, 5]);
        let out = leaky_relu(&[-1.0, 2.0], 0.125, |v| v);
        assert_eq!(out, vec![-0.125, 2.0]);
    }

    #[test]
    fn test_saturate() {
        assert_eq!(saturate(40000, 16), 32767);
        assert_eq!(saturate(-40000, 16), -32768);
        assert_eq!(saturate(-5, 16), -5);
    }
}
