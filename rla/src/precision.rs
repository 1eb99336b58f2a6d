// Copyright 2024 Andrew Conway.
// This file is part of ConcreteRLA.
// ConcreteRLA is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// ConcreteRLA is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License along with ConcreteRLA.  If not, see <https://www.gnu.org/licenses/>.

//! Extended precision arithmetic for likelihood ratios.
//!
//! Likelihood ratios for large electorates are far outside the range of f64. They are held as
//! exact rationals, rounded to a fixed number of significant decimal digits after every multiplication
//! so that the numerator and denominator do not grow without bound over many rounds.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use num::{BigInt, BigRational, One, Signed, ToPrimitive, Zero};
use num::rational::{ParseRatioError, Ratio};
use serde::{Deserialize, Serialize};

/// Fewest significant digits a [PrecisionContext] will ever use.
pub const MINIMUM_SIGNIFICANT_DIGITS : usize = 50;

/// How many significant decimal digits to keep in likelihood ratio computations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecisionContext {
    significant_digits : usize,
}

impl Default for PrecisionContext {
    fn default() -> Self { PrecisionContext{ significant_digits: 100 } }
}

impl PrecisionContext {
    /// Requests below [MINIMUM_SIGNIFICANT_DIGITS] are raised to it.
    pub fn new(significant_digits:usize) -> Self { PrecisionContext{ significant_digits: significant_digits.max(MINIMUM_SIGNIFICANT_DIGITS) } }
    pub fn significant_digits(&self) -> usize { self.significant_digits.max(MINIMUM_SIGNIFICANT_DIGITS) }

    /// Round a rational to the configured number of significant digits, rounding half away from zero.
    /// ```
    /// use num::{BigInt, BigRational};
    /// use rla::precision::PrecisionContext;
    /// let ctx = PrecisionContext::new(50);
    /// let third = BigRational::new(BigInt::from(1),BigInt::from(3));
    /// let rounded = ctx.round(&third);
    /// assert_eq!(rounded.numer().to_string(),"3".repeat(50));
    /// ```
    pub fn round(&self,value:&BigRational) -> BigRational {
        if value.is_zero() || (value.denom().is_one() && decimal_digits(value.numer()) <= self.significant_digits()) { return value.clone(); }
        let negative = value.is_negative();
        let numer = value.numer().abs();
        let denom = value.denom().abs();
        // value is roughly 10^magnitude
        let magnitude = decimal_digits(&numer) as isize - decimal_digits(&denom) as isize;
        let shift = self.significant_digits() as isize - magnitude;
        let two = BigInt::from(2);
        let rounded = if shift>=0 {
            let scale = num::pow(BigInt::from(10),shift as usize);
            let scaled = (&numer*&scale*&two+&denom)/(&denom*&two);
            BigRational::new(scaled,scale)
        } else {
            let scale = num::pow(BigInt::from(10),(-shift) as usize);
            let divisor = &denom*&scale;
            let scaled = (&numer*&two+&divisor)/(&divisor*&two);
            BigRational::from_integer(scaled*scale)
        };
        if negative { -rounded } else { rounded }
    }

    /// Multiply and round.
    pub fn mul(&self,a:&BigRational,b:&BigRational) -> BigRational { self.round(&(a*b)) }

    /// base^exponent by repeated squaring, rounding after each multiplication.
    pub fn pow(&self,base:&BigRational,exponent:usize) -> BigRational {
        let mut res = BigRational::one();
        let mut square = self.round(base);
        let mut togo = exponent;
        while togo>0 {
            if togo&1==1 { res=self.mul(&res,&square); }
            togo>>=1;
            if togo>0 { square=self.mul(&square,&square); }
        }
        res
    }
}

fn decimal_digits(n:&BigInt) -> usize { n.abs().to_str_radix(10).len() }

/// A likelihood ratio (inverse p-value) for one null hypothesis. Serialized as a string like TransferValue is.
#[derive(Clone,Debug,Serialize,Deserialize,Ord, PartialOrd, Eq, PartialEq,Hash)]
#[serde(into = "String")]
#[serde(try_from = "String")]
pub struct Likelihood(pub BigRational);

impl Likelihood {
    pub fn one() -> Self { Likelihood(BigRational::one()) }
    /// The p-value this corresponds to, 1/T, as a float. Infinite if T is zero.
    pub fn p_value(&self) -> f64 {
        if self.0.is_zero() { f64::INFINITY } else { self.0.recip().to_f64().unwrap_or(0.0) }
    }
    pub fn to_f64(&self) -> f64 { self.0.to_f64().unwrap_or(f64::INFINITY) }
    /// true iff this has reached the value needed to reject the null hypothesis.
    pub fn reaches(&self,threshold:&BigRational) -> bool { &self.0>=threshold }
}

impl Display for Likelihood {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f,"{}",self.0)
    }
}

impl From<Likelihood> for String {
    fn from(t: Likelihood) -> Self { t.0.to_string() }
}

impl FromStr for Likelihood {
    type Err = ParseRatioError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Ok(Likelihood(Ratio::from_str(s)?)) }
}

impl TryFrom<String> for Likelihood {
    type Error = ParseRatioError;
    fn try_from(s: String) -> Result<Self, Self::Error> { Ok(Likelihood(Ratio::from_str(&s)?)) }
}

/// Convert a usize to a rational.
pub fn rational(n:usize) -> BigRational { BigRational::from_integer(BigInt::from(n)) }

/// n/d as a rational. d must be non-zero.
pub fn ratio(n:usize,d:usize) -> BigRational { BigRational::new(BigInt::from(n),BigInt::from(d)) }

/// Serialize an exact rational as a string like "19/20". Reading also accepts decimals like "0.95".
pub mod rational_string {
    use num::BigRational;
    use serde::{Deserialize, Deserializer, Serializer};
    use crate::contest_metadata::parse_decimal;

    pub fn serialize<S:Serializer>(value:&BigRational,serializer:S) -> Result<S::Ok,S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de,D:Deserializer<'de>>(deserializer:D) -> Result<BigRational,D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_decimal(&s).ok_or_else(||serde::de::Error::custom(format!("not a rational number : {}",s)))
    }
}

/// p-values are infinite when a likelihood is zero, which JSON cannot represent. Write those as null.
pub mod p_value_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S:Serializer>(value:&f64,serializer:S) -> Result<S::Ok,S::Error> {
        if value.is_finite() { serializer.serialize_some(value) } else { serializer.serialize_none() }
    }

    pub fn deserialize<'de,D:Deserializer<'de>>(deserializer:D) -> Result<f64,D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}
