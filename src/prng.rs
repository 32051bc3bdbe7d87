/// Timestamp key of the generation that starts from a different `x` word.
const X_OVERRIDE_TIMESTAMP: &str = "1599883309";
const X_OVERRIDE: u32 = 0x2567_de00;

/// Xorshift128 generator reproducing the vendor's displacement stream.
///
/// `w` is seeded, the other words start from fixed constants. All arithmetic
/// wraps at 32 bits.
#[derive(Debug, Clone)]
pub struct RandomGenerator {
    x: u32,
    y: u32,
    z: u32,
    w: u32,
}

impl RandomGenerator {
    pub const DEFAULT_SEED: i64 = 0x549_1333;

    pub fn new(seed: i64) -> Self {
        Self {
            x: 0x075b_cd15,
            y: 0x159a_55e5,
            z: 0x1f12_3bb5,
            // Seeds are reduced modulo 2^32 like any 32-bit integer operand.
            w: seed as u32,
        }
    }

    /// Generator for a given scheme generation, applying the `x` override
    /// that one generation requires.
    pub fn for_scheme(seed: i64, timestamp: &str) -> Self {
        let mut generator = Self::new(seed);
        if timestamp == X_OVERRIDE_TIMESTAMP {
            generator.replace_x(X_OVERRIDE);
        }
        generator
    }

    pub fn replace_x(&mut self, x: u32) {
        self.x = x;
    }

    /// Uniform value in `[0, 1]`; exactly `1.0` only when the state word is
    /// `i32::MIN`.
    pub fn next(&mut self) -> f64 {
        f64::from(self.step()).abs() / 2_147_483_648.0
    }

    pub fn next_in_range(&mut self, range: u32) -> u32 {
        let scaled = (f64::from(range) * self.next()).floor() as u32;
        scaled % range
    }

    fn step(&mut self) -> i32 {
        let t = self.x ^ (self.x << 11);
        self.x = self.y;
        self.y = self.z;
        self.z = self.w;
        self.w = self.w ^ (self.w >> 19) ^ (t ^ (t >> 8));
        self.w as i32
    }
}

impl Default for RandomGenerator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SEED)
    }
}
