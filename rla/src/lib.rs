// Copyright 2024 Andrew Conway.
// This file is part of ConcreteRLA.
// ConcreteRLA is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// ConcreteRLA is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License along with ConcreteRLA.  If not, see <https://www.gnu.org/licenses/>.


pub mod errors;
pub mod contest_metadata;
pub mod vote_count;
pub mod precision;
pub mod divisor;
pub mod sampling;
pub mod beacon;
pub mod sequential_test;
pub mod sample_size;
pub mod scheme;
pub mod audit;
pub mod registry;
pub mod monte_carlo;
