// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::error::Error;

/// A stream item that may stand in for an error.
pub trait MaybeError {
    fn from_err(err: Box<dyn Error + Send + Sync>) -> Self;

    fn err(&self) -> Option<anyhow::Error>;

    fn is_ok(&self) -> bool {
        !self.is_err()
    }

    fn is_err(&self) -> bool {
        self.err().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Outcome(Option<String>);

    impl MaybeError for Outcome {
        fn from_err(err: Box<dyn Error + Send + Sync>) -> Self {
            Outcome(Some(err.to_string()))
        }
        fn err(&self) -> Option<anyhow::Error> {
            self.0.clone().map(anyhow::Error::msg)
        }
    }

    #[test]
    fn test_default_predicates() {
        let ok = Outcome(None);
        assert!(ok.is_ok());

        let failed = Outcome::from_err(anyhow::anyhow!("checkpoint corrupt").into());
        assert!(failed.is_err());
        assert_eq!(failed.err().unwrap().to_string(), "checkpoint corrupt");
    }
}
