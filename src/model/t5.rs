use burn::module::Module;
use burn::nn::{Embedding, EmbeddingConfig, Linear, LinearConfig, RmsNorm, RmsNormConfig};
use burn::tensor::activation::{relu, softmax};
use burn::tensor::{backend::Backend, Int, Tensor};

use crate::config::T5Config;

/// Large negative value used instead of `-inf` so masked rows stay finite.
const MASK_VALUE: f32 = -1.0e9;

/// Maps a key-minus-query distance onto one of `num_buckets` buckets: exact
/// buckets for short distances, log-spaced ones up to `max_distance`.
/// Bidirectional buckets spend half of the range on positive distances.
pub fn relative_position_bucket(
    relative_position: i64,
    bidirectional: bool,
    num_buckets: usize,
    max_distance: usize,
) -> i64 {
    let mut num_buckets = num_buckets as i64;
    let mut bucket = 0;
    let distance = if bidirectional {
        num_buckets /= 2;
        if relative_position > 0 {
            bucket += num_buckets;
        }
        relative_position.abs()
    } else {
        -relative_position.min(0)
    };

    let max_exact = num_buckets / 2;
    if distance < max_exact {
        return bucket + distance;
    }

    let log_ratio = (distance as f32 / max_exact as f32).ln()
        / (max_distance as f32 / max_exact as f32).ln();
    let large = max_exact + (log_ratio * (num_buckets - max_exact) as f32) as i64;
    bucket + large.min(num_buckets - 1)
}

#[derive(Module, Debug)]
pub struct T5Attention<B: Backend> {
    q: Linear<B>,
    k: Linear<B>,
    v: Linear<B>,
    o: Linear<B>,
    relative_attention_bias: Option<Embedding<B>>,
    #[module(skip)]
    num_heads: usize,
    #[module(skip)]
    d_kv: usize,
    #[module(skip)]
    num_buckets: usize,
    #[module(skip)]
    max_distance: usize,
    #[module(skip)]
    bidirectional: bool,
}

impl<B: Backend> T5Attention<B> {
    pub fn new(config: &T5Config, has_relative_bias: bool, bidirectional: bool, device: &B::Device) -> Self {
        let inner_dim = config.inner_dim();
        let projection = |d_in, d_out| LinearConfig::new(d_in, d_out).with_bias(false).init(device);

        let relative_attention_bias = if has_relative_bias {
            Some(EmbeddingConfig::new(config.relative_attention_num_buckets, config.num_heads).init(device))
        } else {
            None
        };

        Self {
            q: projection(config.d_model, inner_dim),
            k: projection(config.d_model, inner_dim),
            v: projection(config.d_model, inner_dim),
            o: projection(inner_dim, config.d_model),
            relative_attention_bias,
            num_heads: config.num_heads,
            d_kv: config.d_kv,
            num_buckets: config.relative_attention_num_buckets,
            max_distance: config.relative_attention_max_distance,
            bidirectional,
        }
    }

    pub fn has_relative_bias(&self) -> bool {
        self.relative_attention_bias.is_some()
    }

    /// Relative position bias of shape `[1, heads, query_len, key_len]`.
    pub fn compute_bias(&self, query_len: usize, key_len: usize, device: &B::Device) -> Option<Tensor<B, 4>> {
        let embedding = self.relative_attention_bias.as_ref()?;

        let buckets: Vec<i64> = (0..query_len)
            .flat_map(|query| {
                (0..key_len).map(move |key| {
                    relative_position_bucket(
                        key as i64 - query as i64,
                        self.bidirectional,
                        self.num_buckets,
                        self.max_distance,
                    )
                })
            })
            .collect();

        let buckets = Tensor::<B, 1, Int>::from_ints(buckets.as_slice(), device).reshape([query_len, key_len]);
        // [query, key, heads] -> [1, heads, query, key]
        Some(embedding.forward(buckets).permute([2, 0, 1]).unsqueeze::<4>())
    }

    fn split_heads(&self, x: Tensor<B, 3>) -> Tensor<B, 4> {
        let [batch, seq_len, _] = x.dims();
        x.reshape([batch, seq_len, self.num_heads, self.d_kv]).swap_dims(1, 2)
    }

    /// Self-attention when `key_value` is `None`, cross-attention otherwise.
    /// T5 does not scale scores by `sqrt(d_kv)`; the checkpoint folds it into `q`.
    pub fn forward(
        &self,
        hidden: Tensor<B, 3>,
        key_value: Option<Tensor<B, 3>>,
        position_bias: Option<Tensor<B, 4>>,
    ) -> Tensor<B, 3> {
        let [batch, query_len, _] = hidden.dims();
        let source = key_value.unwrap_or_else(|| hidden.clone());

        let q = self.split_heads(self.q.forward(hidden));
        let k = self.split_heads(self.k.forward(source.clone()));
        let v = self.split_heads(self.v.forward(source));

        let mut scores = q.matmul(k.swap_dims(2, 3));
        if let Some(bias) = position_bias {
            scores = scores + bias;
        }

        let weights = softmax(scores, 3);
        let context = weights
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, query_len, self.num_heads * self.d_kv]);

        self.o.forward(context)
    }
}

#[derive(Module, Debug)]
pub struct T5DenseReluDense<B: Backend> {
    wi: Linear<B>,
    wo: Linear<B>,
}

impl<B: Backend> T5DenseReluDense<B> {
    pub fn new(config: &T5Config, device: &B::Device) -> Self {
        Self {
            wi: LinearConfig::new(config.d_model, config.d_ff).with_bias(false).init(device),
            wo: LinearConfig::new(config.d_ff, config.d_model).with_bias(false).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.wo.forward(relu(self.wi.forward(x)))
    }
}

#[derive(Module, Debug)]
pub struct T5Block<B: Backend> {
    self_attention: T5Attention<B>,
    self_attention_norm: RmsNorm<B>,
    cross_attention: Option<T5Attention<B>>,
    cross_attention_norm: Option<RmsNorm<B>>,
    feed_forward: T5DenseReluDense<B>,
    feed_forward_norm: RmsNorm<B>,
}

impl<B: Backend> T5Block<B> {
    pub fn new(config: &T5Config, is_decoder: bool, has_relative_bias: bool, device: &B::Device) -> Self {
        let norm = || RmsNormConfig::new(config.d_model).with_epsilon(config.layer_norm_epsilon).init(device);

        let (cross_attention, cross_attention_norm) = if is_decoder {
            (Some(T5Attention::new(config, false, false, device)), Some(norm()))
        } else {
            (None, None)
        };

        Self {
            self_attention: T5Attention::new(config, has_relative_bias, !is_decoder, device),
            self_attention_norm: norm(),
            cross_attention,
            cross_attention_norm,
            feed_forward: T5DenseReluDense::new(config, device),
            feed_forward_norm: norm(),
        }
    }

    pub fn forward(
        &self,
        hidden: Tensor<B, 3>,
        position_bias: Tensor<B, 4>,
        encoder_hidden: Option<Tensor<B, 3>>,
    ) -> Tensor<B, 3> {
        let normed = self.self_attention_norm.forward(hidden.clone());
        let mut hidden = hidden + self.self_attention.forward(normed, None, Some(position_bias));

        if let (Some(attention), Some(norm), Some(encoder_hidden)) =
            (&self.cross_attention, &self.cross_attention_norm, encoder_hidden)
        {
            let normed = norm.forward(hidden.clone());
            hidden = hidden + attention.forward(normed, Some(encoder_hidden), None);
        }

        let normed = self.feed_forward_norm.forward(hidden.clone());
        hidden + self.feed_forward.forward(normed)
    }
}

/// Encoder or decoder stack. Only the first block owns a relative position
/// bias table; its bias is shared by every block of the stack.
#[derive(Module, Debug)]
pub struct T5Stack<B: Backend> {
    block: Vec<T5Block<B>>,
    final_layer_norm: RmsNorm<B>,
    #[module(skip)]
    is_decoder: bool,
}

impl<B: Backend> T5Stack<B> {
    pub fn new(config: &T5Config, is_decoder: bool, device: &B::Device) -> Self {
        let num_layers = if is_decoder {
            config.num_decoder_layers
        } else {
            config.num_layers
        };

        let block = (0..num_layers)
            .map(|idx| T5Block::new(config, is_decoder, idx == 0, device))
            .collect();

        Self {
            block,
            final_layer_norm: RmsNormConfig::new(config.d_model)
                .with_epsilon(config.layer_norm_epsilon)
                .init(device),
            is_decoder,
        }
    }

    fn position_bias(&self, seq_len: usize, device: &B::Device) -> Tensor<B, 4> {
        let bias = self.block[0]
            .self_attention
            .compute_bias(seq_len, seq_len, device)
            .unwrap_or_else(|| Tensor::zeros([1, 1, seq_len, seq_len], device));

        if !self.is_decoder {
            return bias;
        }

        let mask: Vec<f32> = (0..seq_len)
            .flat_map(|query| (0..seq_len).map(move |key| if key > query { MASK_VALUE } else { 0.0 }))
            .collect();
        let mask = Tensor::<B, 1>::from_floats(mask.as_slice(), device).reshape([1, 1, seq_len, seq_len]);

        bias + mask
    }

    pub fn forward(&self, embeddings: Tensor<B, 3>, encoder_hidden: Option<Tensor<B, 3>>) -> Tensor<B, 3> {
        let device = embeddings.device();
        let seq_len = embeddings.dims()[1];
        let position_bias = self.position_bias(seq_len, &device);

        let mut hidden = embeddings;
        for block in &self.block {
            hidden = block.forward(hidden, position_bias.clone(), encoder_hidden.clone());
        }

        self.final_layer_norm.forward(hidden)
    }
}

#[derive(Module, Debug)]
pub struct T5ForConditionalGeneration<B: Backend> {
    shared: Embedding<B>,
    encoder: T5Stack<B>,
    decoder: T5Stack<B>,
    lm_head: Option<Linear<B>>,
    #[module(skip)]
    d_model: usize,
}

impl<B: Backend> T5ForConditionalGeneration<B> {
    /// Randomly initialised model with the layout of `config`; pretrained
    /// weights are loaded on top of it with [`Module::load_record`].
    pub fn new(config: &T5Config, device: &B::Device) -> Self {
        let lm_head = if config.tie_word_embeddings {
            None
        } else {
            Some(LinearConfig::new(config.d_model, config.vocab_size).with_bias(false).init(device))
        };

        Self {
            shared: EmbeddingConfig::new(config.vocab_size, config.d_model).init(device),
            encoder: T5Stack::new(config, false, device),
            decoder: T5Stack::new(config, true, device),
            lm_head,
            d_model: config.d_model,
        }
    }

    /// Encoder hidden states `[batch, seq_len, d_model]`.
    pub fn encode(&self, input_ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let embeddings = self.shared.forward(input_ids);
        self.encoder.forward(embeddings, None)
    }

    /// Vocabulary logits `[batch, vocab]` for the token following the last
    /// position of every decoder sequence.
    pub fn next_token_logits(&self, decoder_ids: Tensor<B, 2, Int>, encoder_hidden: Tensor<B, 3>) -> Tensor<B, 2> {
        let [batch, seq_len] = decoder_ids.dims();
        let embeddings = self.shared.forward(decoder_ids);
        let hidden = self.decoder.forward(embeddings, Some(encoder_hidden));
        let last = hidden
            .slice([0..batch, seq_len - 1..seq_len, 0..self.d_model])
            .reshape([batch, self.d_model]);

        match &self.lm_head {
            Some(head) => head.forward(last),
            None => {
                // Tied head: rescale before projecting onto the embedding matrix.
                let scale = (self.d_model as f64).powf(-0.5);
                (last * scale).matmul(self.shared.weight.val().transpose())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    pub(crate) type TestBackend = NdArray<f32>;

    pub(crate) fn tiny_config(vocab_size: usize) -> T5Config {
        T5Config {
            vocab_size,
            d_model: 16,
            d_kv: 4,
            d_ff: 32,
            num_layers: 2,
            num_decoder_layers: 2,
            num_heads: 4,
            relative_attention_num_buckets: 8,
            relative_attention_max_distance: 16,
            ..T5Config::default()
        }
    }

    #[test]
    fn test_bidirectional_buckets() {
        let bucket = |rel| relative_position_bucket(rel, true, 32, 128);
        assert_eq!(bucket(0), 0);
        assert_eq!(bucket(-1), 1);
        assert_eq!(bucket(-7), 7);
        assert_eq!(bucket(1), 17);
        assert_eq!(bucket(-20), 10);
        assert_eq!(bucket(-500), 15);
        assert_eq!(bucket(500), 31);
    }

    #[test]
    fn test_causal_buckets_ignore_future() {
        let bucket = |rel| relative_position_bucket(rel, false, 32, 128);
        assert_eq!(bucket(3), 0);
        assert_eq!(bucket(-3), 3);
        assert_eq!(bucket(-15), 15);
        assert_eq!(bucket(-40), 23);
        assert_eq!(bucket(-1000), 31);
    }

    #[test]
    fn test_only_first_block_has_bias() {
        let device = Default::default();
        let stack = T5Stack::<TestBackend>::new(&tiny_config(10), false, &device);
        assert!(stack.block[0].self_attention.has_relative_bias());
        assert!(stack.block[1..].iter().all(|b| !b.self_attention.has_relative_bias()));
        assert!(stack.block.iter().all(|b| b.cross_attention.is_none()));
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let model = T5ForConditionalGeneration::<TestBackend>::new(&tiny_config(10), &device);

        let input = Tensor::<TestBackend, 1, Int>::from_ints([3, 4, 5, 1].as_slice(), &device).reshape([1, 4]);
        let encoded = model.encode(input);
        assert_eq!(encoded.dims(), [1, 4, 16]);

        let decoder_ids = Tensor::<TestBackend, 1, Int>::from_ints([0, 3, 0, 4].as_slice(), &device).reshape([2, 2]);
        let logits = model.next_token_logits(decoder_ids, encoded.repeat_dim(0, 2));
        assert_eq!(logits.dims(), [2, 10]);
    }

    #[test]
    fn test_decoder_is_causal() {
        let device = Default::default();
        let model = T5ForConditionalGeneration::<TestBackend>::new(&tiny_config(10), &device);
        let input = Tensor::<TestBackend, 1, Int>::from_ints([3, 4, 1].as_slice(), &device).reshape([1, 3]);
        let encoded = model.encode(input);

        let short = Tensor::<TestBackend, 1, Int>::from_ints([0, 5].as_slice(), &device).reshape([1, 2]);
        let embeddings = model.shared.forward(short);
        let short_hidden = model.decoder.forward(embeddings, Some(encoded.clone()));

        let long = Tensor::<TestBackend, 1, Int>::from_ints([0, 5, 7].as_slice(), &device).reshape([1, 3]);
        let embeddings = model.shared.forward(long);
        let long_hidden = model.decoder.forward(embeddings, Some(encoded)).slice([0..1, 0..2, 0..16]);

        let diff: f32 = (short_hidden - long_hidden)
            .abs()
            .max()
            .into_scalar();
        assert!(diff < 1e-4, "appending a token changed earlier positions by {diff}");
    }
}
